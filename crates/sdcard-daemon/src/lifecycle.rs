//! Mount lifecycle state machine.
//!
//! [`MountLifecycle`] owns the authoritative [`CardState`] together with the
//! detect monitor and both storage collaborators. It is driven one
//! [`step`](MountLifecycle::step) at a time by the background task; each
//! step runs to completion and returns how long the task may sleep before
//! the next one if no wake arrives.
//!
//! Readiness ordering:
//! - the readiness flag is published only after `Filesystem::mount` returned
//!   success,
//! - it is withdrawn before any flush or unmount call is made.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::{DaemonConfig, MountOptions};
use crate::debounce::{self, DebounceFilter, Settle};
use crate::detect::{DetectLine, DetectLineError, DetectMonitor, WakeSignal};
use crate::error::MountFailure;
use crate::pin::PinId;
use crate::retry::RetryCounter;
use crate::state::{CardEvent, CardState, Direction, SharedStatus, Transition, TransitionCallback};
use crate::storage::{Filesystem, StorageBus, StorageError, StorageErrorKind};

/// Hardware collaborators handed to the daemon at creation.
pub struct CardPeripherals {
    /// Card detect input.
    pub detect: Box<dyn DetectLine>,
    /// Storage bus.
    pub bus: Box<dyn StorageBus>,
    /// Filesystem driver.
    pub filesystem: Box<dyn Filesystem>,
}

impl CardPeripherals {
    /// Bundle concrete collaborators.
    pub fn new(
        detect: impl DetectLine + 'static,
        bus: impl StorageBus + 'static,
        filesystem: impl Filesystem + 'static,
    ) -> Self {
        Self {
            detect: Box::new(detect),
            bus: Box::new(bus),
            filesystem: Box::new(filesystem),
        }
    }
}

impl core::fmt::Debug for CardPeripherals {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CardPeripherals").finish_non_exhaustive()
    }
}

enum AttemptError {
    Transient(StorageError),
    Permanent(StorageError),
    FormatFailed(StorageError),
}

impl AttemptError {
    fn classify(err: StorageError) -> Self {
        if err.is_transient() {
            Self::Transient(err)
        } else {
            Self::Permanent(err)
        }
    }
}

/// The card state machine. Lives on the background task.
pub struct MountLifecycle {
    config: DaemonConfig,
    clock: SharedClock,
    monitor: DetectMonitor,
    bus: Box<dyn StorageBus>,
    filesystem: Box<dyn Filesystem>,
    state: CardState,
    filter: DebounceFilter,
    retry: RetryCounter,
    retry_at: Option<Instant>,
    bus_up: bool,
    status: Arc<SharedStatus>,
    callback: Option<TransitionCallback>,
}

impl MountLifecycle {
    /// Create a state machine in `Absent`.
    #[must_use]
    pub fn new(
        config: DaemonConfig,
        peripherals: CardPeripherals,
        wake: WakeSignal,
        status: Arc<SharedStatus>,
        clock: SharedClock,
    ) -> Self {
        let monitor = DetectMonitor::new(
            config.detect_pin,
            config.detect_polarity,
            peripherals.detect,
            wake,
        );
        let filter = DebounceFilter::new(config.debounce.samples, false);
        let retry = RetryCounter::new(config.retry.max_attempts);
        status.state.store(CardState::Absent);
        Self {
            config,
            clock,
            monitor,
            bus: peripherals.bus,
            filesystem: peripherals.filesystem,
            state: CardState::Absent,
            filter,
            retry,
            retry_at: None,
            bus_up: false,
            status,
            callback: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CardState {
        self.state
    }

    /// Detect pin.
    #[must_use]
    pub fn detect_pin(&self) -> PinId {
        self.monitor.pin()
    }

    /// Attempts made for the current insertion.
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    /// Install the transition callback.
    pub fn set_callback(&mut self, callback: Option<TransitionCallback>) {
        self.callback = callback;
    }

    /// Arm the detect interrupt and take the power-up reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt cannot be registered.
    pub fn arm(&mut self) -> Result<(), DetectLineError> {
        let present = self.monitor.arm()?;
        info!(
            pin = %self.monitor.pin(),
            present,
            "Card detect armed"
        );
        Ok(())
    }

    /// Run one state machine step to completion.
    ///
    /// Returns the longest time the caller may wait for a wake before
    /// calling `step` again.
    pub fn step(&mut self) -> Duration {
        match self.state {
            CardState::Absent | CardState::Debouncing(_) => match self.detect_change() {
                Some(true) => self.on_inserted(),
                _ => self.idle(),
            },
            CardState::Mounting(attempt) => match self.detect_change() {
                Some(false) => self.on_removed(),
                _ => self.mount_step(attempt),
            },
            CardState::Mounted => match self.detect_change() {
                Some(false) => self.on_removed_while_mounted(),
                _ => self.idle(),
            },
            CardState::MountFailed => match self.detect_change() {
                Some(false) => self.on_removed(),
                _ => self.idle(),
            },
            CardState::Unmounting => self.finish_unmount(),
        }
    }

    /// Final cleanup when the background task exits.
    ///
    /// Unmounts a mounted card, completes an interrupted unmount and disarms
    /// the detect interrupt.
    pub fn shutdown(&mut self) {
        match self.state {
            CardState::Mounted => {
                info!("Unmounting card for shutdown");
                self.status.readiness.withdraw();
                self.enter(CardState::Unmounting);
                self.finish_unmount();
            }
            CardState::Unmounting => {
                self.finish_unmount();
            }
            _ => {
                if self.bus_up {
                    self.release_bus();
                }
            }
        }
        self.monitor.disarm();
    }

    fn idle(&self) -> Duration {
        self.config.poll_interval
    }

    fn enter(&mut self, state: CardState) {
        self.state = state;
        self.status.state.store(state);
    }

    fn transition(&mut self, to: CardState, event: CardEvent) {
        let from = self.state;
        self.enter(to);
        if to == CardState::Mounted {
            self.status.readiness.publish();
        }
        info!(%from, %to, ?event, "Card state transition");
        if let Some(callback) = self.callback.as_mut() {
            callback(&Transition { from, to, event });
        }
    }

    /// Debounce a detect line change, if there is one.
    ///
    /// Returns the newly accepted presence when a change is confirmed.
    fn detect_change(&mut self) -> Option<bool> {
        let present = self.monitor.is_present();
        if present == self.filter.stable() {
            return None;
        }

        let origin = self.state;
        self.enter(CardState::Debouncing(Direction::toward(present)));

        let monitor = &self.monitor;
        let outcome = debounce::settle(
            &mut self.filter,
            &self.config.debounce,
            self.clock.as_ref(),
            || monitor.is_present(),
        );
        self.enter(origin);

        match outcome {
            Settle::Confirmed(present) => {
                debug!(present, "Detect line change confirmed");
                Some(present)
            }
            Settle::Steady | Settle::Bounced => {
                debug!(state = %origin, "Detect line change rejected as bounce");
                self.status.metrics.record_spurious_change();
                None
            }
        }
    }

    fn on_inserted(&mut self) -> Duration {
        self.status.metrics.record_insert();
        self.retry.reset();
        self.retry_at = None;
        self.transition(CardState::Mounting(1), CardEvent::Inserted);
        Duration::ZERO
    }

    fn on_removed(&mut self) -> Duration {
        self.status.metrics.record_removal();
        self.retry.reset();
        self.retry_at = None;
        if self.bus_up {
            self.release_bus();
        }
        self.transition(CardState::Absent, CardEvent::Removed);
        self.idle()
    }

    fn on_removed_while_mounted(&mut self) -> Duration {
        self.status.metrics.record_removal();
        self.status.readiness.withdraw();
        self.transition(CardState::Unmounting, CardEvent::Removed);
        Duration::ZERO
    }

    fn mount_step(&mut self, attempt: u32) -> Duration {
        if let Some(retry_at) = self.retry_at {
            let now = self.clock.now();
            if now < retry_at {
                return retry_at.saturating_duration_since(now);
            }
            self.retry_at = None;
        }

        self.retry.record_attempt();
        self.status.metrics.record_mount_attempt();
        info!(
            attempt,
            max_attempts = self.config.retry.max_attempts,
            "Mounting card"
        );

        match self.try_mount() {
            Ok(()) => {
                self.retry.reset();
                self.status.metrics.record_mount();
                self.transition(CardState::Mounted, CardEvent::Mounted);
                self.idle()
            }
            Err(AttemptError::Transient(err)) if self.retry.can_retry() => {
                let delay = self.config.retry.delay_after(attempt);
                warn!(
                    attempt,
                    error = %err,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Transient mount failure, retrying"
                );
                self.retry_at = self.clock.now().checked_add(delay);
                self.enter(CardState::Mounting(attempt.saturating_add(1)));
                delay
            }
            Err(AttemptError::Transient(err)) => self.fail(MountFailure::RetriesExhausted {
                attempts: self.retry.attempts(),
                last_error: err,
            }),
            Err(AttemptError::Permanent(err)) => self.fail(MountFailure::Permanent(err)),
            Err(AttemptError::FormatFailed(err)) => self.fail(MountFailure::FormatFailed(err)),
        }
    }

    fn fail(&mut self, failure: MountFailure) -> Duration {
        warn!(error = %failure, "Card unusable until reinserted");
        self.status.metrics.record_mount_failure();
        self.retry_at = None;
        self.transition(CardState::MountFailed, CardEvent::MountFailed(failure));
        self.idle()
    }

    fn try_mount(&mut self) -> Result<(), AttemptError> {
        if let Err(err) = self.bus.initialize(&self.config.bus) {
            self.release_bus();
            return Err(AttemptError::classify(err));
        }
        self.bus_up = true;

        let options = self.config.mount;
        let result = match self.mount_within_timeout(&options) {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() || !options.format_if_mount_failed => {
                Err(AttemptError::classify(err))
            }
            Err(err) => {
                warn!(error = %err, "Mount failed, formatting card");
                self.format_and_mount(&options)
            }
        };
        if result.is_err() {
            self.release_bus();
        }
        result
    }

    fn format_and_mount(&mut self, options: &MountOptions) -> Result<(), AttemptError> {
        self.status.metrics.record_format();
        self.filesystem
            .format(options)
            .map_err(AttemptError::FormatFailed)?;
        info!(
            allocation_unit_size = options.allocation_unit_size,
            "Card formatted"
        );
        self.mount_within_timeout(options)
            .map_err(AttemptError::classify)
    }

    /// Mount, treating a call that overran `command_timeout` as a timeout.
    ///
    /// A late success is undone so the volume is not left attached.
    fn mount_within_timeout(&mut self, options: &MountOptions) -> Result<(), StorageError> {
        let started = self.clock.now();
        self.filesystem.mount(options)?;

        let elapsed = self.clock.now().saturating_duration_since(started);
        let limit = self.config.bus.command_timeout;
        if elapsed <= limit {
            return Ok(());
        }
        if let Err(err) = self.filesystem.unmount() {
            warn!(error = %err, "Unmount after late mount failed");
        }
        Err(StorageError::new(
            StorageErrorKind::Timeout,
            format!(
                "mount took {}ms, limit {}ms",
                elapsed.as_millis(),
                limit.as_millis()
            ),
        ))
    }

    fn release_bus(&mut self) {
        if let Err(err) = self.bus.release() {
            warn!(error = %err, "Storage bus release failed");
        }
        self.bus_up = false;
    }

    fn finish_unmount(&mut self) -> Duration {
        if let Err(err) = self.filesystem.flush() {
            warn!(error = %err, "Flush before unmount failed");
            self.status.metrics.record_unmount_error();
        }
        if let Err(err) = self.filesystem.unmount() {
            warn!(error = %err, "Unmount failed");
            self.status.metrics.record_unmount_error();
        }
        if let Err(err) = self.bus.release() {
            warn!(error = %err, "Storage bus release failed");
            self.status.metrics.record_unmount_error();
        }
        self.bus_up = false;
        self.retry.reset();
        self.retry_at = None;
        self.transition(CardState::Absent, CardEvent::Unmounted);
        self.idle()
    }
}

impl core::fmt::Debug for MountLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MountLifecycle")
            .field("state", &self.state)
            .field("monitor", &self.monitor)
            .field("retry", &self.retry)
            .field("bus_up", &self.bus_up)
            .finish_non_exhaustive()
    }
}

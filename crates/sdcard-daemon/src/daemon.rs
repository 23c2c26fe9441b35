//! Daemon facade.

use std::sync::Arc;

use crossbeam::channel;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::config::DaemonConfig;
use crate::detect::{WakeSignal, wake_channel};
use crate::error::{DaemonError, DaemonResult};
use crate::lifecycle::{CardPeripherals, MountLifecycle};
use crate::pin::{PinId, PinRegistry, PinReservation};
use crate::state::{CardState, DaemonMetrics, SharedStatus, TransitionCallback};
use crate::task::{self, Control, WorkerHandle};

/// Owning handle to a running SD card daemon.
///
/// Constructed explicitly with [`create`](Self::create) and passed by
/// reference to whoever needs the readiness query. Dropping the handle
/// stops the background task, unmounts a mounted card and releases the
/// detect pin.
///
/// Every query method is non-blocking and safe to call from any thread.
pub struct SdCardDaemon {
    config: DaemonConfig,
    status: Arc<SharedStatus>,
    wake: WakeSignal,
    started: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
    reservation: Mutex<Option<PinReservation>>,
}

impl SdCardDaemon {
    /// Validate `config`, reserve the detect pin and spawn the (parked)
    /// background task.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::Config`] if the configuration is invalid, exceeds the
    ///   filesystem driver's open-file limit, or names an unusable pin.
    /// - [`DaemonError::PinInUse`] if another component holds the pin.
    /// - [`DaemonError::TaskSpawn`] if the thread cannot be created.
    ///
    /// On error nothing is left behind: the pin is free and no thread runs.
    pub fn create(
        config: DaemonConfig,
        pins: &PinRegistry,
        peripherals: CardPeripherals,
    ) -> DaemonResult<Self> {
        Self::create_with_clock(config, pins, peripherals, Arc::new(SystemClock))
    }

    /// [`create`](Self::create) with an explicit time source.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub fn create_with_clock(
        config: DaemonConfig,
        pins: &PinRegistry,
        peripherals: CardPeripherals,
        clock: SharedClock,
    ) -> DaemonResult<Self> {
        config.validate()?;
        config
            .mount
            .check_driver_limit(peripherals.filesystem.max_open_files_supported())?;

        let reservation = pins.reserve(config.detect_pin, config.task_name.clone())?;

        let status = Arc::new(SharedStatus::default());
        let (wake, wake_rx) = wake_channel();
        let lifecycle = MountLifecycle::new(
            config.clone(),
            peripherals,
            wake.clone(),
            Arc::clone(&status),
            clock,
        );
        // Dropping `reservation` on the error path frees the pin again.
        let worker = task::spawn(&config, lifecycle, wake_rx)?;

        info!(
            pin = %config.detect_pin,
            polarity = ?config.detect_polarity,
            max_open_files = config.mount.max_open_files,
            debounce_window_ms = u64::try_from(config.debounce.window().as_millis()).unwrap_or(u64::MAX),
            format_if_mount_failed = config.mount.format_if_mount_failed,
            "SD card daemon created"
        );
        Ok(Self {
            config,
            status,
            wake,
            started: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
            reservation: Mutex::new(Some(reservation)),
        })
    }

    /// Arm card detection and start the state machine.
    ///
    /// `callback` runs on the background task for every confirmed transition.
    /// It must return quickly and must not touch the filesystem.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::AlreadyStarted`] on a second successful call.
    /// - [`DaemonError::InterruptSetup`] if the detect interrupt cannot be
    ///   registered; `start` may be called again afterwards.
    /// - [`DaemonError::TaskGone`] after [`stop`](Self::stop).
    pub fn start(&self, callback: Option<TransitionCallback>) -> DaemonResult<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DaemonError::AlreadyStarted);
        }

        let result = self.request_start(callback);
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    fn request_start(&self, callback: Option<TransitionCallback>) -> DaemonResult<()> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        {
            let worker = self.worker.lock();
            let Some(worker) = worker.as_ref() else {
                return Err(DaemonError::TaskGone);
            };
            worker
                .control
                .send(Control::Start {
                    callback,
                    reply: reply_tx,
                })
                .map_err(|_| DaemonError::TaskGone)?;
        }
        reply_rx.recv().map_err(|_| DaemonError::TaskGone)?
    }

    /// Check if the filesystem is mounted and safe to use.
    ///
    /// A single atomic load. May lag the physical slot by one debounce
    /// window plus one mount or unmount.
    #[must_use]
    pub fn is_card_working(&self) -> bool {
        self.status.readiness.is_ready()
    }

    /// Last state published by the background task.
    #[must_use]
    pub fn state(&self) -> CardState {
        self.status.state.load()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> DaemonMetrics {
        self.status.metrics.snapshot()
    }

    /// Configuration the daemon was created with.
    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Reserved detect pin.
    #[must_use]
    pub fn detect_pin(&self) -> PinId {
        self.config.detect_pin
    }

    /// Check if the background task has been started and not stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && self.worker.lock().is_some()
    }

    /// Stop the background task and release the detect pin.
    ///
    /// Lets the current step finish, unmounts a mounted card and joins the
    /// thread. Idempotent; also runs on drop.
    pub fn stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        self.wake.notify();
        let _ = worker.control.try_send(Control::Shutdown);

        if worker.join.join().is_err() {
            error!("SD card background task panicked");
        }
        self.status.readiness.withdraw();

        if let Some(reservation) = self.reservation.lock().take() {
            info!(pin = %reservation.pin(), "SD card daemon stopped, detect pin released");
        } else {
            warn!("SD card daemon stopped without a pin reservation");
        }
    }
}

impl core::fmt::Debug for SdCardDaemon {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdCardDaemon")
            .field("detect_pin", &self.config.detect_pin)
            .field("state", &self.state())
            .field("ready", &self.is_card_working())
            .field("started", &self.started.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Drop for SdCardDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

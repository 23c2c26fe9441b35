//! Card detect line monitoring.
//!
//! The interrupt side of the daemon is tiny: an edge on the
//! detect line calls [`WakeSignal::notify`], which posts into a single-slot
//! channel without blocking or allocating. Any number of edges before the
//! background task runs collapse into one wake.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;

use crate::pin::{Level, PinId, Polarity};

/// Failure reported by a detect line driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DetectLineError {
    reason: String,
}

impl DetectLineError {
    /// Create a detect line error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Digital input wired to the slot's card detect switch.
pub trait DetectLine: Send {
    /// Read the current level. Must not block.
    fn level(&self) -> Level;

    /// Register a both-edge interrupt that calls `wake.notify()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt cannot be registered.
    fn arm_interrupt(&mut self, wake: WakeSignal) -> Result<(), DetectLineError>;

    /// Remove the interrupt handler.
    fn disarm_interrupt(&mut self);
}

/// Interrupt-safe wake notification for the background task.
#[derive(Debug, Clone)]
pub struct WakeSignal {
    tx: Sender<()>,
}

impl WakeSignal {
    /// Post a wake. Never blocks and never allocates.
    ///
    /// Returns `false` if a wake was already pending (coalesced) or the
    /// receiver is gone.
    pub fn notify(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Outcome of waiting on a [`WakeReceiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A notification was consumed.
    Notified,
    /// The timeout elapsed first.
    TimedOut,
    /// Every [`WakeSignal`] was dropped.
    Closed,
}

/// Consuming end of the wake channel, owned by the background task.
#[derive(Debug)]
pub struct WakeReceiver {
    rx: Receiver<()>,
}

impl WakeReceiver {
    /// Wait for a notification or the timeout.
    pub fn wait(&self, timeout: Duration) -> Wake {
        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(()) => Wake::Notified,
                Err(TryRecvError::Empty) => Wake::TimedOut,
                Err(TryRecvError::Disconnected) => Wake::Closed,
            };
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Wake::Notified,
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Wake::Closed,
        }
    }

    /// Check if a notification is pending without consuming it.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Create a linked wake signal and receiver with a single slot.
#[must_use]
pub fn wake_channel() -> (WakeSignal, WakeReceiver) {
    let (tx, rx) = channel::bounded(1);
    (WakeSignal { tx }, WakeReceiver { rx })
}

/// Owns the detect line and translates levels into card presence.
pub struct DetectMonitor {
    pin: PinId,
    polarity: Polarity,
    line: Box<dyn DetectLine>,
    wake: WakeSignal,
    armed: bool,
}

impl DetectMonitor {
    /// Wrap a detect line.
    #[must_use]
    pub fn new(pin: PinId, polarity: Polarity, line: Box<dyn DetectLine>, wake: WakeSignal) -> Self {
        Self {
            pin,
            polarity,
            line,
            wake,
            armed: false,
        }
    }

    /// Detect pin.
    #[must_use]
    pub fn pin(&self) -> PinId {
        self.pin
    }

    /// Arm the edge interrupt and take the power-up reading.
    ///
    /// A wake is always posted afterwards so the first loop iteration
    /// samples the line even if no edge ever arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the interrupt cannot be registered.
    pub fn arm(&mut self) -> Result<bool, DetectLineError> {
        if !self.armed {
            self.line.arm_interrupt(self.wake.clone())?;
            self.armed = true;
        }
        let present = self.is_present();
        tracing::debug!(pin = %self.pin, present, "Detect interrupt armed");
        self.wake.notify();
        Ok(present)
    }

    /// Remove the interrupt handler if armed.
    pub fn disarm(&mut self) {
        if self.armed {
            self.line.disarm_interrupt();
            self.armed = false;
            tracing::debug!(pin = %self.pin, "Detect interrupt disarmed");
        }
    }

    /// Check if the interrupt is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Sample the line once.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.polarity.is_present(self.line.level())
    }
}

impl core::fmt::Debug for DetectMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DetectMonitor")
            .field("pin", &self.pin)
            .field("polarity", &self.polarity)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl Drop for DetectMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

//! Error types for the SD card daemon.
//!
//! Errors are split by when they can happen:
//!
//! - [`ConfigError`] and [`DaemonError`] surface synchronously from
//!   [`SdCardDaemon::create`](crate::SdCardDaemon::create) and
//!   [`SdCardDaemon::start`](crate::SdCardDaemon::start).
//! - [`MountFailure`] never escapes as a `Result`; the background task
//!   records it by settling in `MountFailed` and reports it through the
//!   transition callback.

use thiserror::Error;

use crate::pin::PinId;
use crate::storage::StorageError;

/// Invalid daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field is outside its accepted range.
    #[error("Invalid value for {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The detect pin does not exist or cannot be used as an input.
    #[error("Pin {0} is not available as a card detect input")]
    InvalidPin(PinId),

    /// The task priority is not supported by the scheduler.
    #[error("Task priority {priority} outside supported range 0..={max}")]
    UnsupportedPriority {
        /// Requested priority.
        priority: u8,
        /// Highest supported priority.
        max: u8,
    },

    /// `max_open_files` exceeds what the filesystem driver supports.
    #[error("max_open_files {requested} exceeds driver limit {limit}")]
    TooManyOpenFiles {
        /// Requested open-file table size.
        requested: u32,
        /// Driver maximum.
        limit: u32,
    },
}

impl ConfigError {
    /// Create an invalid field error.
    #[must_use]
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors returned by the daemon facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DaemonError {
    /// Configuration was rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The detect pin is already reserved by another component.
    #[error("Pin {pin} is already reserved by {owner}")]
    PinInUse {
        /// The contested pin.
        pin: PinId,
        /// Owner that holds the reservation.
        owner: String,
    },

    /// Arming the detect interrupt failed.
    #[error("Interrupt setup failed on pin {pin}: {reason}")]
    InterruptSetup {
        /// Detect pin.
        pin: PinId,
        /// Driver-provided reason.
        reason: String,
    },

    /// The background task could not be created.
    #[error("Failed to spawn background task: {0}")]
    TaskSpawn(String),

    /// `start` was called on a daemon that is already running.
    #[error("Daemon already started")]
    AlreadyStarted,

    /// The background task is gone (stopped or torn down).
    #[error("Background task is not running")]
    TaskGone,
}

impl DaemonError {
    /// Create a pin-in-use error.
    #[must_use]
    pub fn pin_in_use(pin: PinId, owner: impl Into<String>) -> Self {
        Self::PinInUse {
            pin,
            owner: owner.into(),
        }
    }

    /// Create an interrupt setup error.
    #[must_use]
    pub fn interrupt_setup(pin: PinId, reason: impl Into<String>) -> Self {
        Self::InterruptSetup {
            pin,
            reason: reason.into(),
        }
    }

    /// Create a task spawn error.
    #[must_use]
    pub fn task_spawn(reason: impl Into<String>) -> Self {
        Self::TaskSpawn(reason.into())
    }
}

/// Why a card ended up in `MountFailed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MountFailure {
    /// Every attempt failed with a transient error.
    #[error("Mount failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts performed.
        attempts: u32,
        /// Error reported by the final attempt.
        last_error: StorageError,
    },

    /// The medium cannot be mounted without intervention.
    #[error("Permanent mount failure: {0}")]
    Permanent(StorageError),

    /// Formatting the medium failed.
    #[error("Format failed: {0}")]
    FormatFailed(StorageError),
}

impl MountFailure {
    /// The storage error behind this failure.
    #[must_use]
    pub fn storage_error(&self) -> &StorageError {
        match self {
            Self::RetriesExhausted { last_error, .. } => last_error,
            Self::Permanent(err) | Self::FormatFailed(err) => err,
        }
    }
}

/// A specialized `Result` type for daemon operations.
pub type DaemonResult<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageErrorKind;

    #[test]
    fn test_error_display() {
        let err = DaemonError::pin_in_use(PinId::new(34), "touch-panel");
        assert!(err.to_string().contains("GPIO34"));
        assert!(err.to_string().contains("touch-panel"));

        let err = ConfigError::invalid_field("max_open_files", "must be at least 1");
        assert!(err.to_string().contains("max_open_files"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: DaemonError = ConfigError::InvalidPin(PinId::new(99)).into();
        assert!(matches!(err, DaemonError::Config(ConfigError::InvalidPin(_))));
    }

    #[test]
    fn test_mount_failure_storage_error() {
        let failure = MountFailure::RetriesExhausted {
            attempts: 3,
            last_error: StorageError::new(StorageErrorKind::Timeout, "cmd timeout"),
        };
        assert_eq!(failure.storage_error().kind(), StorageErrorKind::Timeout);
        assert!(failure.to_string().contains("3 attempts"));
    }
}

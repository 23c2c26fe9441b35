//! Storage bus and filesystem driver interfaces.
//!
//! The daemon never talks to the card directly. It drives two collaborators,
//! both called only from the background task:
//!
//! - [`StorageBus`] brings the host controller and the card up at the
//!   configured [`BusParams`] and tears them down again.
//! - [`Filesystem`] mounts, formats, flushes and unmounts the volume.
//!
//! Every call may block, bounded by [`BusParams::command_timeout`]. A call
//! that runs out of time must return [`StorageErrorKind::Timeout`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MountOptions;

/// Category of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    /// Bus or card busy.
    Busy,
    /// Command did not complete within the per-attempt timeout.
    Timeout,
    /// Recoverable I/O fault (CRC error, glitch on the lines).
    Io,
    /// No recognizable filesystem on the medium.
    NoFilesystem,
    /// Filesystem structures are damaged.
    Corrupt,
    /// Medium or filesystem type not supported by the driver.
    Unsupported,
    /// Operation requires a mounted volume.
    NotMounted,
}

impl StorageErrorKind {
    /// Check if retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Busy | Self::Timeout | Self::Io)
    }

    /// Get the kind as a string slice.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::NoFilesystem => "no filesystem",
            Self::Corrupt => "corrupt",
            Self::Unsupported => "unsupported",
            Self::NotMounted => "not mounted",
        }
    }
}

impl core::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
}

impl StorageError {
    /// Create a storage error.
    #[must_use]
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Error category.
    #[must_use]
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Driver-provided detail.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Storage bus operating parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusParams {
    /// Bus clock in kHz.
    pub frequency_khz: u32,
    /// Data lines (1, 4 or 8).
    pub bus_width: u8,
    /// Per-attempt command timeout.
    #[serde(with = "crate::config::duration_ms")]
    pub command_timeout: core::time::Duration,
}

impl BusParams {
    /// Default-speed SD clock.
    pub const DEFAULT_FREQUENCY_KHZ: u32 = 20_000;
    /// High-speed SD clock.
    pub const HIGH_SPEED_FREQUENCY_KHZ: u32 = 40_000;
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            frequency_khz: Self::DEFAULT_FREQUENCY_KHZ,
            bus_width: 4,
            command_timeout: core::time::Duration::from_secs(1),
        }
    }
}

/// Host-side storage bus (SD/MMC controller plus card probe).
pub trait StorageBus: Send {
    /// Initialize the bus and probe the card.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller or card does not come up.
    fn initialize(&mut self, params: &BusParams) -> Result<(), StorageError>;

    /// Release the bus. Must tolerate being called when not initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller fails to shut down cleanly.
    fn release(&mut self) -> Result<(), StorageError>;
}

/// Filesystem driver operating on the initialized bus.
pub trait Filesystem: Send {
    /// Largest open-file table the driver supports.
    fn max_open_files_supported(&self) -> u32;

    /// Mount the volume.
    ///
    /// # Errors
    ///
    /// Returns an error describing why the volume could not be mounted.
    fn mount(&mut self, options: &MountOptions) -> Result<(), StorageError>;

    /// Create a fresh filesystem on the medium.
    ///
    /// # Errors
    ///
    /// Returns an error if formatting fails.
    fn format(&mut self, options: &MountOptions) -> Result<(), StorageError>;

    /// Flush cached data to the medium.
    ///
    /// # Errors
    ///
    /// Returns an error if dirty data could not be written.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Unmount the volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver reports a failure while detaching.
    fn unmount(&mut self) -> Result<(), StorageError>;
}

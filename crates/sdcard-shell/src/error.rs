//! Error types for the shell.

use std::path::PathBuf;

use sdcard_daemon::DaemonError;
use thiserror::Error;

/// Errors reported by shell commands and file helpers.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The card is not mounted; no filesystem access is allowed.
    #[error("SD card is not ready")]
    CardNotReady,

    /// The path escapes the mount root or is malformed.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A filesystem operation failed.
    #[error("{op} {path}: {source}")]
    Io {
        /// Operation that failed.
        op: &'static str,
        /// Path it was applied to.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The command line could not be split into words.
    #[error("Parse error: {0}")]
    Tokenize(String),

    /// No command with this name is registered.
    #[error("Unknown command: {0} (try 'help')")]
    UnknownCommand(String),

    /// Two command descriptors share a name.
    #[error("Command registered twice: {0}")]
    DuplicateCommand(&'static str),

    /// Arguments did not match the command's schema.
    #[error("{0}")]
    Usage(String),

    /// A `card` command was used without a simulated slot.
    #[error("No simulated card slot attached")]
    NoSimulator,

    /// The daemon rejected a request.
    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),
}

impl ShellError {
    /// Create an I/O error for `op` on `path`.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// A specialized `Result` type for shell operations.
pub type ShellResult<T> = std::result::Result<T, ShellError>;

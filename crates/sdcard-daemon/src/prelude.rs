//! Prelude for sdcard-daemon.
//!
//! Re-exports what a consumer needs to create a daemon, wire collaborators
//! and watch transitions.
//!
//! # Example
//!
//! ```rust
//! use sdcard_daemon::prelude::*;
//!
//! let config = DaemonConfig::new(PinId::new(34));
//! assert!(config.validate().is_ok());
//! ```

pub use crate::clock::{Clock, SharedClock, SystemClock};
pub use crate::config::{DaemonConfig, DaemonConfigBuilder, DebounceConfig, MountOptions};
pub use crate::daemon::SdCardDaemon;
pub use crate::detect::{DetectLine, DetectLineError, WakeSignal};
pub use crate::error::{ConfigError, DaemonError, DaemonResult, MountFailure};
pub use crate::lifecycle::CardPeripherals;
pub use crate::pin::{Level, PinId, PinRegistry, Polarity};
pub use crate::retry::RetryPolicy;
pub use crate::sim::{Medium, SimulatedSlot};
pub use crate::state::{CardEvent, CardState, DaemonMetrics, Transition, TransitionCallback};
pub use crate::storage::{BusParams, Filesystem, StorageBus, StorageError, StorageErrorKind};

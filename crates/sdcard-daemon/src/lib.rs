//! # sdcard-daemon
//!
//! Hotplug detection and mount lifecycle management for a removable SD card.
//!
//! The daemon watches a card detect line, debounces its mechanical chatter,
//! mounts the filesystem with bounded retry when a card settles in the slot
//! and unmounts it when the card leaves. The rest of the system asks one
//! question, [`SdCardDaemon::is_card_working`], and must not touch the
//! filesystem unless the answer is `true`.
//!
//! ## Concurrency model
//!
//! - **Interrupt context**: the detect line's edge handler only calls
//!   [`WakeSignal::notify`], a non-blocking post into a single-slot channel.
//! - **Background task**: one dedicated thread owns the [`CardState`] and is
//!   the only writer of the readiness flag. Mount and unmount calls block
//!   only this thread.
//! - **Callers**: every method on [`SdCardDaemon`] is a lock-free read or a
//!   control message; none of them waits on storage.
//!
//! ## Readiness ordering
//!
//! Readiness becomes `true` strictly after `Filesystem::mount` returned
//! success and becomes `false` strictly before any flush or unmount call.
//! A caller that saw `true` and then does file I/O can still race a removal;
//! such I/O must handle errors.
//!
//! ## Architecture
//!
//! - [`config`] - Configuration, validation and builder
//! - [`pin`] - Pin identifiers, polarity and the reservation registry
//! - [`detect`] - Detect line trait, wake signal and monitor
//! - [`debounce`] - Consecutive-sample debounce filter
//! - [`retry`] - Mount retry policy and counter
//! - [`storage`] - Storage bus and filesystem collaborator traits
//! - [`lifecycle`] - The mount lifecycle state machine
//! - [`daemon`] - The owning daemon handle
//! - [`sim`] - Simulated slot for hosts without hardware
//!
//! ## Example
//!
//! ```rust
//! use sdcard_daemon::prelude::*;
//! use std::time::{Duration, Instant};
//!
//! let slot = SimulatedSlot::new();
//! let pins = PinRegistry::new(40);
//! let config = DaemonConfig::builder()
//!     .detect_pin(PinId::new(34))
//!     .debounce(2, Duration::from_millis(5))
//!     .build()?;
//!
//! let daemon = SdCardDaemon::create(config, &pins, slot.peripherals(Polarity::ActiveLow))?;
//! daemon.start(None)?;
//! assert!(!daemon.is_card_working());
//!
//! slot.insert();
//! let deadline = Instant::now() + Duration::from_secs(5);
//! while !daemon.is_card_working() && Instant::now() < deadline {
//!     std::thread::sleep(Duration::from_millis(5));
//! }
//! assert!(daemon.is_card_working());
//!
//! daemon.stop();
//! assert!(!pins.is_reserved(PinId::new(34)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod clock;
pub mod config;
pub mod daemon;
pub mod debounce;
pub mod detect;
pub mod error;
pub mod lifecycle;
pub mod pin;
pub mod prelude;
pub mod retry;
pub mod sim;
pub mod state;
pub mod storage;

mod task;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{DaemonConfig, DaemonConfigBuilder, DebounceConfig, MountOptions};
pub use daemon::SdCardDaemon;
pub use detect::{DetectLine, DetectLineError, WakeSignal};
pub use error::{ConfigError, DaemonError, DaemonResult, MountFailure};
pub use lifecycle::CardPeripherals;
pub use pin::{Level, PinId, PinRegistry, PinReservation, Polarity};
pub use retry::RetryPolicy;
pub use state::{CardEvent, CardState, DaemonMetrics, Direction, Transition, TransitionCallback};
pub use storage::{BusParams, Filesystem, StorageBus, StorageError, StorageErrorKind};

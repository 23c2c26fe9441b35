//! Shared test utilities for the SD card daemon workspace.
//!
//! # Modules
//!
//! - [`mod@must`] - Unwrap helpers with good error messages and `#[track_caller]`
//! - [`wait`] - Polling waits with deadlines for asynchronous state
//! - [`recorder`] - Thread-safe event recorder usable as a callback
//! - [`prelude`] - Convenience re-exports
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! sdcard-test-helpers = { workspace = true }
//! ```
//!
//! ```rust,ignore
//! use sdcard_test_helpers::prelude::*;
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::unwrap_used, clippy::panic)]

pub mod must;
pub mod prelude;
pub mod recorder;
pub mod wait;

pub use must::*;
pub use recorder::Recorder;
pub use wait::{WaitTimeout, wait_for, wait_until};

//! Convenience re-exports for common test utilities.
//!
//! ```rust,ignore
//! use sdcard_test_helpers::prelude::*;
//! ```

pub use crate::must::{must, must_err, must_some, must_with};
pub use crate::recorder::Recorder;
pub use crate::wait::{WaitTimeout, wait_for, wait_until};

/// Result type for tests that use `?`.
pub type TestResult = Result<(), Box<dyn std::error::Error>>;

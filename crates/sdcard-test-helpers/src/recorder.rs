//! Thread-safe recorder for callback-delivered events.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::wait::{WaitTimeout, wait_until};

/// Collects events pushed from any thread.
///
/// Cloning yields another handle to the same log, so one clone can be moved
/// into a callback while the test keeps the other.
///
/// # Example
///
/// ```rust
/// use sdcard_test_helpers::Recorder;
///
/// let recorder = Recorder::new();
/// let mut sink = recorder.sink();
/// sink(&"inserted");
/// assert_eq!(recorder.events(), vec!["inserted"]);
/// ```
#[derive(Debug)]
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: T) {
        self.events.lock().push(event);
    }

    /// Callback that clones every event it is given into this recorder.
    pub fn sink(&self) -> impl FnMut(&T) + Send + 'static {
        let recorder = self.clone();
        move |event: &T| recorder.push(event.clone())
    }

    /// Snapshot of every event so far.
    #[must_use]
    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    /// Number of events so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Last recorded event.
    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.events.lock().last().cloned()
    }

    /// Drop every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until at least `count` events were recorded.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] if fewer arrive before `timeout`.
    pub fn wait_for_len(&self, count: usize, timeout: Duration) -> Result<Vec<T>, WaitTimeout> {
        wait_until(&format!("{count} recorded events"), timeout, || self.len() >= count)?;
        Ok(self.events())
    }

    /// Wait until any recorded event matches `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] naming `what` if no match arrives in time.
    pub fn wait_for_match(
        &self,
        what: &str,
        timeout: Duration,
        mut predicate: impl FnMut(&T) -> bool,
    ) -> Result<T, WaitTimeout> {
        crate::wait::wait_for(what, timeout, || {
            self.events.lock().iter().find(|e| predicate(e)).cloned()
        })
    }
}

//! Polling waits for state published by background threads.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Poll period used by [`wait_until`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A condition did not become true before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {waited:?} waiting for {what}")]
pub struct WaitTimeout {
    /// Description of the awaited condition.
    pub what: String,
    /// How long the wait lasted.
    pub waited: Duration,
}

/// Poll `condition` until it returns `true` or `timeout` elapses.
///
/// # Errors
///
/// Returns [`WaitTimeout`] naming `what` if the deadline passes first.
pub fn wait_until(
    what: &str,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<(), WaitTimeout> {
    wait_for(what, timeout, || condition().then_some(()))
}

/// Poll `probe` until it yields a value or `timeout` elapses.
///
/// # Errors
///
/// Returns [`WaitTimeout`] naming `what` if the deadline passes first.
pub fn wait_for<T>(
    what: &str,
    timeout: Duration,
    mut probe: impl FnMut() -> Option<T>,
) -> Result<T, WaitTimeout> {
    let start = Instant::now();
    loop {
        if let Some(value) = probe() {
            return Ok(value);
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(WaitTimeout {
                what: what.to_string(),
                waited,
            });
        }
        thread::sleep(POLL_INTERVAL.min(timeout.saturating_sub(waited)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_wait_until_observes_other_thread() -> Result<(), WaitTimeout> {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.store(true, Ordering::SeqCst);
        });

        wait_until("flag set", Duration::from_secs(5), || flag.load(Ordering::SeqCst))?;
        handle.join().ok();
        Ok(())
    }

    #[test]
    fn test_wait_until_times_out() {
        let err = wait_until("never", Duration::from_millis(10), || false);
        let err = err.err();
        assert!(err.as_ref().is_some_and(|e| e.what == "never"));
        assert!(err.is_some_and(|e| e.waited >= Duration::from_millis(10)));
    }

    #[test]
    fn test_wait_for_returns_value() -> Result<(), WaitTimeout> {
        let mut calls = 0;
        let value = wait_for("third call", Duration::from_secs(1), || {
            calls += 1;
            (calls == 3).then_some(calls)
        })?;
        assert_eq!(value, 3);
        Ok(())
    }
}

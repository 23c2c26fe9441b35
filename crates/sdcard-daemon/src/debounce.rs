//! Detect line debouncing.
//!
//! Mechanical card switches chatter on insertion and removal. A change is
//! accepted only after `samples` consecutive readings, taken `interval`
//! apart, all disagree with the last accepted level. A single reading that
//! matches the accepted level throws the candidate away.

use crate::clock::Clock;
use crate::config::DebounceConfig;

/// Result of feeding one sample into a [`DebounceFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Sample agrees with the accepted level and nothing was pending.
    Steady,
    /// Sample disagrees; more agreeing samples are needed.
    Pending,
    /// Enough consecutive samples agreed; the new level is accepted.
    Confirmed(bool),
    /// A pending change was abandoned.
    Rejected,
}

/// Consecutive-agreement filter over card presence samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceFilter {
    required: u32,
    stable: bool,
    agreeing: u32,
}

impl DebounceFilter {
    /// Create a filter whose accepted level is `stable`.
    #[must_use]
    pub fn new(required: u32, stable: bool) -> Self {
        Self {
            required: required.max(1),
            stable,
            agreeing: 0,
        }
    }

    /// Last accepted presence.
    #[must_use]
    pub fn stable(&self) -> bool {
        self.stable
    }

    /// Check if a change is being counted.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.agreeing > 0
    }

    /// Feed one presence sample.
    pub fn feed(&mut self, present: bool) -> Sample {
        if present == self.stable {
            if self.agreeing > 0 {
                self.agreeing = 0;
                return Sample::Rejected;
            }
            return Sample::Steady;
        }
        self.agreeing = self.agreeing.saturating_add(1);
        if self.agreeing >= self.required {
            self.stable = present;
            self.agreeing = 0;
            Sample::Confirmed(present)
        } else {
            Sample::Pending
        }
    }

    /// Force the accepted level, dropping any pending candidate.
    pub fn reset(&mut self, stable: bool) {
        self.stable = stable;
        self.agreeing = 0;
    }
}

/// Outcome of [`settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// The line matches the accepted level; nothing to do.
    Steady,
    /// A change was confirmed; carries the new presence.
    Confirmed(bool),
    /// The line changed but fell back before confirmation.
    Bounced,
}

/// Sample the line until the filter confirms or rejects a change.
///
/// Takes at most `config.samples` readings, so it always terminates
/// regardless of how the line behaves.
pub fn settle(
    filter: &mut DebounceFilter,
    config: &DebounceConfig,
    clock: &dyn Clock,
    mut sample: impl FnMut() -> bool,
) -> Settle {
    match filter.feed(sample()) {
        Sample::Steady | Sample::Rejected => return Settle::Steady,
        Sample::Confirmed(present) => return Settle::Confirmed(present),
        Sample::Pending => {}
    }
    loop {
        clock.sleep(config.interval);
        match filter.feed(sample()) {
            Sample::Pending => {}
            Sample::Confirmed(present) => return Settle::Confirmed(present),
            Sample::Steady | Sample::Rejected => return Settle::Bounced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use core::time::Duration;

    fn config(samples: u32) -> DebounceConfig {
        DebounceConfig {
            samples,
            interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_filter_requires_consecutive_samples() {
        let mut filter = DebounceFilter::new(3, false);
        assert_eq!(filter.feed(true), Sample::Pending);
        assert_eq!(filter.feed(true), Sample::Pending);
        assert_eq!(filter.feed(true), Sample::Confirmed(true));
        assert!(filter.stable());
        assert_eq!(filter.feed(true), Sample::Steady);
    }

    #[test]
    fn test_filter_rejects_interrupted_run() {
        let mut filter = DebounceFilter::new(3, false);
        assert_eq!(filter.feed(true), Sample::Pending);
        assert_eq!(filter.feed(true), Sample::Pending);
        assert_eq!(filter.feed(false), Sample::Rejected);
        assert!(!filter.stable());
        assert!(!filter.is_pending());
    }

    #[test]
    fn test_single_sample_filter_confirms_immediately() {
        let mut filter = DebounceFilter::new(1, true);
        assert_eq!(filter.feed(false), Sample::Confirmed(false));
    }

    #[test]
    fn test_settle_confirms_clean_insert() {
        let clock = ManualClock::new();
        let mut filter = DebounceFilter::new(3, false);

        let result = settle(&mut filter, &config(3), &clock, || true);

        assert_eq!(result, Settle::Confirmed(true));
        assert_eq!(clock.elapsed(), Duration::from_millis(20));
    }

    #[test]
    fn test_settle_detects_bounce() {
        let clock = ManualClock::new();
        let mut filter = DebounceFilter::new(3, false);
        let mut readings = [true, false].into_iter();

        let result = settle(&mut filter, &config(3), &clock, || {
            readings.next().unwrap_or(false)
        });

        assert_eq!(result, Settle::Bounced);
        assert!(!filter.stable());
    }

    #[test]
    fn test_settle_steady_takes_one_sample() {
        let clock = ManualClock::new();
        let mut filter = DebounceFilter::new(3, true);
        let mut calls = 0;

        let result = settle(&mut filter, &config(3), &clock, || {
            calls += 1;
            true
        });

        assert_eq!(result, Settle::Steady);
        assert_eq!(calls, 1);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}

//! Property-based tests for debounce convergence and retry backoff.

mod common;

use std::time::Duration;

use common::{Harness, quick_config};
use proptest::prelude::*;
use sdcard_daemon::debounce::{DebounceFilter, Sample};
use sdcard_daemon::{CardState, RetryPolicy};

#[derive(Debug, Clone)]
struct Burst {
    toggles: u32,
    period_ms: u64,
    gap_ms: u64,
}

fn burst() -> impl Strategy<Value = Burst> {
    (0..12u32, 1..15u64, 0..50u64).prop_map(|(toggles, period_ms, gap_ms)| Burst {
        toggles,
        period_ms,
        gap_ms,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_state_converges_to_final_physical_condition(
        bursts in prop::collection::vec(burst(), 0..8),
        final_present in any::<bool>(),
    ) {
        let mut config = quick_config();
        config.retry.max_attempts = 16;
        let mut h = Harness::new(config).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut at = Duration::ZERO;
        let mut present = false;
        for b in &bursts {
            for _ in 0..b.toggles {
                present = !present;
                h.slot.set_present_after(at, present);
                at += Duration::from_millis(b.period_ms);
            }
            at += Duration::from_millis(b.gap_ms);
        }
        h.slot.set_present_after(at, final_present);

        let end = h.run_for(at + Duration::from_secs(4));
        let expected = if final_present { CardState::Mounted } else { CardState::Absent };
        prop_assert_eq!(end, expected);
        prop_assert_eq!(h.is_ready(), final_present);
        prop_assert_eq!(h.slot.is_mounted(), final_present);

        // Settled: more time changes nothing.
        let transitions = h.transitions.len();
        prop_assert_eq!(h.run_for(Duration::from_secs(1)), expected);
        prop_assert_eq!(h.transitions.len(), transitions);
    }

    #[test]
    fn test_filter_confirms_only_after_required_run(
        required in 1..8u32,
        samples in prop::collection::vec(any::<bool>(), 0..64),
    ) {
        let mut filter = DebounceFilter::new(required, false);
        let mut run = 0u32;
        for present in samples {
            let before = filter.stable();
            let outcome = filter.feed(present);
            if present == before {
                run = 0;
                prop_assert!(!matches!(outcome, Sample::Confirmed(_)));
            } else {
                run += 1;
                if run == required {
                    prop_assert_eq!(outcome, Sample::Confirmed(present));
                    run = 0;
                } else {
                    prop_assert_eq!(outcome, Sample::Pending);
                }
            }
        }
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped(
        initial_ms in 1..500u64,
        extra_ms in 0..5_000u64,
        multiplier in 1..5u32,
        attempts in 1..40u32,
    ) {
        let policy = RetryPolicy {
            max_attempts: 16,
            initial_backoff: Duration::from_millis(initial_ms),
            max_backoff: Duration::from_millis(initial_ms + extra_ms),
            multiplier,
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..=attempts {
            let delay = policy.delay_after(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.max_backoff);
            prop_assert!(delay >= policy.initial_backoff);
            previous = delay;
        }
    }
}

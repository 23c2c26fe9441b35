//! State machine scenarios on a manual clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, TestResult, quick_config};
use sdcard_daemon::ManualClock;
use sdcard_daemon::prelude::*;

#[test]
fn test_insert_formatted_card_mounts() -> TestResult {
    let mut h = Harness::new(quick_config())?;
    assert_eq!(h.run_for(Duration::from_millis(100)), CardState::Absent);
    assert!(!h.is_ready());

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);
    assert!(h.is_ready());
    assert!(h.slot.is_mounted());
    assert_eq!(
        h.edges(),
        vec![
            (CardState::Absent, CardState::Mounting(1)),
            (CardState::Mounting(1), CardState::Mounted),
        ]
    );
    assert_eq!(h.status.state.load(), CardState::Mounted);
    Ok(())
}

#[test]
fn test_card_present_at_power_up_mounts_without_edge() -> TestResult {
    let clock = ManualClock::new();
    let slot = SimulatedSlot::with_clock(Arc::new(clock.clone()));
    slot.insert();

    let mut h = Harness::with_slot(quick_config(), clock, slot)?;
    assert_eq!(h.run_for(Duration::from_millis(100)), CardState::Mounted);
    assert!(h.is_ready());
    Ok(())
}

#[test]
fn test_retries_exhausted_after_exactly_max_attempts() -> TestResult {
    let mut config = quick_config();
    config.retry.max_attempts = 4;
    let mut h = Harness::new(config)?;
    h.slot.fail_next_inits(u32::MAX, StorageErrorKind::Timeout);

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_secs(5)), CardState::MountFailed);

    assert!(!h.is_ready());
    assert_eq!(h.slot.counters().bus_inits, 4);
    assert_eq!(h.metrics().mount_attempts, 4);
    assert_eq!(h.metrics().mount_failures, 1);

    let last = h.transitions.last().ok_or("no transitions recorded")?;
    assert!(matches!(
        last.event,
        CardEvent::MountFailed(MountFailure::RetriesExhausted { attempts: 4, .. })
    ));
    Ok(())
}

#[test]
fn test_mount_over_command_timeout_is_retried_then_fails() -> TestResult {
    let mut config = quick_config();
    config.bus.command_timeout = Duration::from_millis(100);
    let mut h = Harness::new(config)?;
    h.slot.set_mount_delay(Duration::from_secs(5));

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_secs(30)), CardState::MountFailed);

    assert!(!h.is_ready());
    assert!(!h.slot.is_mounted(), "late mounts are undone");
    assert_eq!(h.metrics().mounts, 0);
    assert_eq!(h.metrics().mount_attempts, 3);
    assert_eq!(h.slot.counters().mounts, 3);
    assert_eq!(h.slot.counters().unmounts, 3);

    let last = h.transitions.last().ok_or("no transitions recorded")?;
    match last.event {
        CardEvent::MountFailed(MountFailure::RetriesExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error.kind(), StorageErrorKind::Timeout);
        }
        other => return Err(format!("unexpected event {other:?}").into()),
    }
    Ok(())
}

#[test]
fn test_mount_within_command_timeout_succeeds() -> TestResult {
    let mut config = quick_config();
    config.bus.command_timeout = Duration::from_millis(100);
    let mut h = Harness::new(config)?;
    h.slot.set_mount_delay(Duration::from_millis(60));

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(500)), CardState::Mounted);
    assert_eq!(h.metrics().mount_attempts, 1);
    assert!(h.is_ready());
    Ok(())
}

#[test]
fn test_transient_failures_back_off_then_mount() -> TestResult {
    let mut h = Harness::new(quick_config())?;
    h.slot.fail_next_inits(2, StorageErrorKind::Busy);

    h.slot.insert();
    let before = h.clock.elapsed();
    assert_eq!(h.run_for(Duration::from_secs(1)), CardState::Mounted);

    assert_eq!(h.slot.counters().bus_inits, 3);
    assert_eq!(h.metrics().mount_attempts, 3);
    assert_eq!(h.lifecycle.retry_attempts(), 0, "counter resets after success");
    // 20ms + 40ms of backoff sit between the three attempts.
    assert!(h.clock.elapsed() - before >= Duration::from_millis(60));

    // Retries stay inside Mounting and do not reach the callback.
    assert_eq!(
        h.edges(),
        vec![
            (CardState::Absent, CardState::Mounting(1)),
            (CardState::Mounting(3), CardState::Mounted),
        ]
    );
    Ok(())
}

#[test]
fn test_unformatted_card_fails_then_good_card_mounts() -> TestResult {
    let mut h = Harness::new(quick_config())?;
    h.slot.set_medium(Medium::Unformatted);

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_secs(2)), CardState::MountFailed);
    assert!(!h.is_ready());
    assert_eq!(h.slot.counters().formats, 0);
    let failed = h.transitions.last().ok_or("no transitions recorded")?;
    match failed.event {
        CardEvent::MountFailed(MountFailure::Permanent(err)) => {
            assert_eq!(err.kind(), StorageErrorKind::NoFilesystem);
        }
        other => return Err(format!("unexpected event {other:?}").into()),
    }

    h.slot.remove();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Absent);
    assert!(!h.is_ready());

    h.slot.set_medium(Medium::Formatted);
    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);
    assert!(h.is_ready());
    Ok(())
}

#[test]
fn test_format_if_mount_failed_formats_once() -> TestResult {
    let mut config = quick_config();
    config.mount.format_if_mount_failed = true;
    config.mount.allocation_unit_size = 16 * 1024;
    let mut h = Harness::new(config)?;
    h.slot.set_medium(Medium::Corrupt);

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);
    assert_eq!(h.slot.counters().formats, 1);
    assert_eq!(h.slot.counters().mounts, 2);
    assert_eq!(h.metrics().formats, 1);
    assert_eq!(h.slot.medium(), Medium::Formatted);
    Ok(())
}

#[test]
fn test_format_failure_is_permanent() -> TestResult {
    let mut config = quick_config();
    config.mount.format_if_mount_failed = true;
    let mut h = Harness::new(config)?;
    h.slot.set_medium(Medium::Unformatted);
    h.slot.fail_format(true);

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_secs(1)), CardState::MountFailed);
    assert_eq!(h.metrics().mount_attempts, 1);
    let failed = h.transitions.last().ok_or("no transitions recorded")?;
    assert!(matches!(
        failed.event,
        CardEvent::MountFailed(MountFailure::FormatFailed(_))
    ));
    Ok(())
}

#[test]
fn test_transient_error_never_triggers_format() -> TestResult {
    let mut config = quick_config();
    config.mount.format_if_mount_failed = true;
    let mut h = Harness::new(config)?;
    h.slot.fail_next_inits(1, StorageErrorKind::Timeout);

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(500)), CardState::Mounted);
    assert_eq!(h.slot.counters().formats, 0);
    Ok(())
}

#[test]
fn test_bounce_burst_without_stable_end_makes_no_storage_calls() -> TestResult {
    let mut h = Harness::new(quick_config())?;

    // Six edges 2ms apart end where they started: empty.
    h.slot.schedule_bounce(6, Duration::from_millis(2));
    assert_eq!(h.run_for(Duration::from_millis(500)), CardState::Absent);

    let counters = h.slot.counters();
    assert_eq!(counters.mount_unmount_calls(), 0);
    assert_eq!(counters.bus_inits, 0);
    assert!(h.metrics().spurious_changes >= 1);
    assert!(h.transitions.is_empty());
    Ok(())
}

#[test]
fn test_removal_bounce_keeps_card_mounted() -> TestResult {
    let mut h = Harness::new(quick_config())?;
    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);

    h.slot.schedule_bounce(2, Duration::from_millis(3));
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);
    assert!(h.is_ready());
    assert_eq!(h.slot.counters().unmounts, 0);
    // Debouncing never outlives the step that entered it.
    assert_eq!(h.status.state.load(), CardState::Mounted);
    assert_eq!(h.lifecycle.state(), CardState::Mounted);
    Ok(())
}

#[test]
fn test_unmount_errors_still_end_absent() -> TestResult {
    let mut h = Harness::new(quick_config())?;
    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);

    h.slot.fail_unmount(true);
    h.slot.remove();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Absent);

    assert!(!h.is_ready());
    assert!(h.metrics().unmount_errors >= 1);
    assert_eq!(h.slot.counters().unmounts, 1);
    let edges = h.edges();
    assert_eq!(
        edges[edges.len() - 2..],
        [
            (CardState::Mounted, CardState::Unmounting),
            (CardState::Unmounting, CardState::Absent),
        ]
    );
    Ok(())
}

#[test]
fn test_readiness_ordering_seen_from_callback() -> TestResult {
    let clock = ManualClock::new();
    let slot = SimulatedSlot::with_clock(Arc::new(clock.clone()));
    let mut h = Harness::with_slot(quick_config(), clock, slot)?;

    let status = Arc::clone(&h.status);
    let observed = sdcard_test_helpers::Recorder::new();
    let sink = observed.clone();
    h.lifecycle.set_callback(Some(Box::new(move |t: &Transition| {
        sink.push((t.to, status.readiness.is_ready()));
    })));

    h.slot.fail_next_inits(1, StorageErrorKind::Busy);
    h.slot.insert();
    h.run_for(Duration::from_millis(300));
    h.slot.remove();
    h.run_for(Duration::from_millis(300));

    for (to, ready) in observed.events() {
        assert_eq!(ready, to == CardState::Mounted, "readiness wrong on entering {to}");
    }
    assert_eq!(observed.len(), 4);
    Ok(())
}

#[test]
fn test_removal_during_retries_returns_to_absent() -> TestResult {
    let mut config = quick_config();
    config.retry.max_attempts = 10;
    let mut h = Harness::new(config)?;
    h.slot.fail_next_inits(u32::MAX, StorageErrorKind::Io);

    h.slot.insert();
    h.run_for(Duration::from_millis(60));
    assert!(matches!(h.lifecycle.state(), CardState::Mounting(n) if n > 1));

    h.slot.remove();
    assert_eq!(h.run_for(Duration::from_millis(300)), CardState::Absent);
    assert_eq!(h.lifecycle.retry_attempts(), 0);
    let last = h.transitions.last().ok_or("no transitions recorded")?;
    assert_eq!(last.event, CardEvent::Removed);
    Ok(())
}

#[test]
fn test_shutdown_unmounts_and_disarms() -> TestResult {
    let mut h = Harness::new(quick_config())?;
    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);
    assert!(h.slot.is_armed());

    h.lifecycle.shutdown();

    assert_eq!(h.lifecycle.state(), CardState::Absent);
    assert!(!h.is_ready());
    assert!(!h.slot.is_mounted());
    assert!(!h.slot.is_armed());
    assert_eq!(h.slot.counters().unmounts, 1);
    let last = h.transitions.last().ok_or("no transitions recorded")?;
    assert_eq!(last.event, CardEvent::Unmounted);
    Ok(())
}

#[test]
fn test_active_high_polarity() -> TestResult {
    let mut config = quick_config();
    config.detect_polarity = Polarity::ActiveHigh;
    let mut h = Harness::new(config)?;

    h.slot.insert();
    assert_eq!(h.run_for(Duration::from_millis(200)), CardState::Mounted);
    Ok(())
}

//! Deterministic harness driving the lifecycle on a manual clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sdcard_daemon::detect::{WakeReceiver, wake_channel};
use sdcard_daemon::lifecycle::MountLifecycle;
use sdcard_daemon::sim::SimulatedSlot;
use sdcard_daemon::state::SharedStatus;
use sdcard_daemon::{CardState, DaemonConfig, DaemonMetrics, ManualClock, Transition};
use sdcard_test_helpers::Recorder;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Largest jump of virtual time between two steps.
pub const TICK: Duration = Duration::from_millis(10);

const MAX_STEPS: usize = 100_000;

pub struct Harness {
    pub lifecycle: MountLifecycle,
    pub slot: SimulatedSlot,
    pub clock: ManualClock,
    pub status: Arc<SharedStatus>,
    pub transitions: Recorder<Transition>,
    wake: WakeReceiver,
}

impl Harness {
    pub fn new(config: DaemonConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let clock = ManualClock::new();
        let slot = SimulatedSlot::with_clock(Arc::new(clock.clone()));
        Self::with_slot(config, clock, slot)
    }

    pub fn with_slot(
        config: DaemonConfig,
        clock: ManualClock,
        slot: SimulatedSlot,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let status = Arc::new(SharedStatus::default());
        let (signal, wake) = wake_channel();
        let peripherals = slot.peripherals(config.detect_polarity);
        let mut lifecycle = MountLifecycle::new(
            config,
            peripherals,
            signal,
            Arc::clone(&status),
            Arc::new(clock.clone()),
        );
        let transitions = Recorder::new();
        lifecycle.set_callback(Some(Box::new(transitions.sink())));
        lifecycle.arm()?;
        Ok(Self {
            lifecycle,
            slot,
            clock,
            status,
            transitions,
            wake,
        })
    }

    /// Step the machine until `duration` of virtual time has passed.
    pub fn run_for(&mut self, duration: Duration) -> CardState {
        let end = self.clock.elapsed().saturating_add(duration);
        for _ in 0..MAX_STEPS {
            if self.clock.elapsed() >= end {
                break;
            }
            let wait = self.lifecycle.step();
            self.clock.advance(wait.min(TICK));
        }
        self.lifecycle.state()
    }

    pub fn is_ready(&self) -> bool {
        self.status.readiness.is_ready()
    }

    pub fn metrics(&self) -> DaemonMetrics {
        self.status.metrics.snapshot()
    }

    /// `(from, to)` pairs of every recorded transition.
    pub fn edges(&self) -> Vec<(CardState, CardState)> {
        self.transitions
            .events()
            .into_iter()
            .map(|t| (t.from, t.to))
            .collect()
    }
}

/// Config with short debounce and backoff so scenarios finish quickly.
pub fn quick_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.debounce.samples = 3;
    config.debounce.interval = Duration::from_millis(5);
    config.retry.initial_backoff = Duration::from_millis(20);
    config.retry.max_backoff = Duration::from_millis(200);
    config.poll_interval = Duration::from_millis(50);
    config
}

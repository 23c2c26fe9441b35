//! Card state, readiness flag and daemon metrics.
//!
//! [`CardState`] has a single authoritative copy owned by the background
//! task. Other threads only ever see the lock-free views defined here:
//! [`ReadinessFlag`], [`StateMirror`] and [`DaemonMetrics`] snapshots.

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::error::MountFailure;

/// Direction of a pending detect-line change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Line moved toward "present".
    Inserting,
    /// Line moved toward "absent".
    Removing,
}

impl Direction {
    /// Direction for a change toward the given presence.
    #[must_use]
    pub fn toward(present: bool) -> Self {
        if present {
            Self::Inserting
        } else {
            Self::Removing
        }
    }
}

/// Mount lifecycle state.
///
/// ```text
/// Absent ──insert──► Mounting(1) ──ok──► Mounted ──remove──► Unmounting ──► Absent
///                       │  ▲                                                  ▲
///             transient │  │ backoff                                          │
///                       ▼  │                                                  │
///                   Mounting(n+1) ──exhausted / permanent──► MountFailed ─remove┘
/// ```
///
/// `Debouncing` wraps every stable state while a detect-line change is
/// being confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardState {
    /// No card in the slot.
    #[default]
    Absent,
    /// Confirming a detect-line change.
    Debouncing(Direction),
    /// Mount attempt `n` pending or in progress.
    Mounting(u32),
    /// Filesystem mounted and usable.
    Mounted,
    /// Flushing and unmounting after removal or teardown.
    Unmounting,
    /// Card present but unusable.
    MountFailed,
}

impl CardState {
    /// Get the state name as a string slice.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::Debouncing(_) => "Debouncing",
            Self::Mounting(_) => "Mounting",
            Self::Mounted => "Mounted",
            Self::Unmounting => "Unmounting",
            Self::MountFailed => "MountFailed",
        }
    }

    /// Check if the state is one the machine rests in without pending work.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Absent | Self::Mounted | Self::MountFailed)
    }

    fn encode(self) -> u32 {
        match self {
            Self::Absent => 0,
            Self::Debouncing(Direction::Inserting) => 1,
            Self::Debouncing(Direction::Removing) => 2,
            Self::Mounted => 3,
            Self::Unmounting => 4,
            Self::MountFailed => 5,
            Self::Mounting(attempt) => 6 | (attempt.min(0x00FF_FFFF) << 8),
        }
    }

    fn decode(raw: u32) -> Self {
        match raw & 0xFF {
            1 => Self::Debouncing(Direction::Inserting),
            2 => Self::Debouncing(Direction::Removing),
            3 => Self::Mounted,
            4 => Self::Unmounting,
            5 => Self::MountFailed,
            6 => Self::Mounting(raw >> 8),
            _ => Self::Absent,
        }
    }
}

impl core::fmt::Display for CardState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Debouncing(direction) => write!(f, "Debouncing({direction:?})"),
            Self::Mounting(attempt) => write!(f, "Mounting({attempt})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Confirmed event reported to the transition callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// A card insertion passed debouncing.
    Inserted,
    /// The filesystem is mounted.
    Mounted,
    /// Mounting gave up.
    MountFailed(MountFailure),
    /// A card removal passed debouncing.
    Removed,
    /// The filesystem was detached (errors, if any, were logged).
    Unmounted,
}

/// A confirmed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: CardState,
    /// State after the change.
    pub to: CardState,
    /// What caused it.
    pub event: CardEvent,
}

/// Callback invoked on the background task for every confirmed transition.
///
/// Must not block or touch the filesystem.
pub type TransitionCallback = Box<dyn FnMut(&Transition) + Send + 'static>;

/// "Filesystem mounted and safe to use" flag.
///
/// Written only by the background task, read by anyone.
#[derive(Debug, Default)]
pub struct ReadinessFlag {
    ready: AtomicBool,
}

impl ReadinessFlag {
    /// Create a flag reading `false`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    /// Current value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn withdraw(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

/// Lock-free copy of the current [`CardState`] for diagnostics.
#[derive(Debug, Default)]
pub struct StateMirror {
    raw: AtomicU32,
}

impl StateMirror {
    /// Create a mirror showing `Absent`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            raw: AtomicU32::new(CardState::Absent.encode()),
        }
    }

    /// Last published state.
    #[must_use]
    pub fn load(&self) -> CardState {
        CardState::decode(self.raw.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: CardState) {
        self.raw.store(state.encode(), Ordering::Release);
    }
}

/// Snapshot of daemon counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaemonMetrics {
    /// Confirmed insertions.
    pub inserts: u64,
    /// Confirmed removals.
    pub removals: u64,
    /// Mount attempts started.
    pub mount_attempts: u64,
    /// Mounts that succeeded.
    pub mounts: u64,
    /// Insertions that ended in `MountFailed`.
    pub mount_failures: u64,
    /// Formats performed.
    pub formats: u64,
    /// Flush or unmount calls that reported an error.
    pub unmount_errors: u64,
    /// Detect-line changes rejected as bounce.
    pub spurious_changes: u64,
}

/// Atomic counters behind [`DaemonMetrics`].
#[derive(Debug, Default)]
pub struct MetricsCounters {
    inserts: AtomicU64,
    removals: AtomicU64,
    mount_attempts: AtomicU64,
    mounts: AtomicU64,
    mount_failures: AtomicU64,
    formats: AtomicU64,
    unmount_errors: AtomicU64,
    spurious_changes: AtomicU64,
}

impl MetricsCounters {
    /// Take a snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DaemonMetrics {
        DaemonMetrics {
            inserts: self.inserts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            mount_attempts: self.mount_attempts.load(Ordering::Relaxed),
            mounts: self.mounts.load(Ordering::Relaxed),
            mount_failures: self.mount_failures.load(Ordering::Relaxed),
            formats: self.formats.load(Ordering::Relaxed),
            unmount_errors: self.unmount_errors.load(Ordering::Relaxed),
            spurious_changes: self.spurious_changes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mount_attempt(&self) {
        self.mount_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mount(&self) {
        self.mounts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mount_failure(&self) {
        self.mount_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_format(&self) {
        self.formats.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmount_error(&self) {
        self.unmount_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spurious_change(&self) {
        self.spurious_changes.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the background task and the daemon handle.
#[derive(Debug, Default)]
pub struct SharedStatus {
    /// Readiness flag.
    pub readiness: ReadinessFlag,
    /// Current state mirror.
    pub state: StateMirror,
    /// Counters.
    pub metrics: MetricsCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mirror_round_trips_every_kind() {
        let mirror = StateMirror::new();
        assert_eq!(mirror.load(), CardState::Absent);

        for state in [
            CardState::Debouncing(Direction::Inserting),
            CardState::Debouncing(Direction::Removing),
            CardState::Mounting(1),
            CardState::Mounting(7),
            CardState::Mounted,
            CardState::Unmounting,
            CardState::MountFailed,
            CardState::Absent,
        ] {
            mirror.store(state);
            assert_eq!(mirror.load(), state);
        }
    }

    #[test]
    fn test_readiness_flag() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
        flag.publish();
        assert!(flag.is_ready());
        flag.withdraw();
        assert!(!flag.is_ready());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CardState::Mounting(2).to_string(), "Mounting(2)");
        assert_eq!(CardState::MountFailed.to_string(), "MountFailed");
        assert!(CardState::Mounted.is_settled());
        assert!(!CardState::Unmounting.is_settled());
    }

    #[test]
    fn test_metrics_snapshot() {
        let counters = MetricsCounters::default();
        counters.record_insert();
        counters.record_mount_attempt();
        counters.record_mount_attempt();
        counters.record_spurious_change();

        let metrics = counters.snapshot();
        assert_eq!(metrics.inserts, 1);
        assert_eq!(metrics.mount_attempts, 2);
        assert_eq!(metrics.spurious_changes, 1);
        assert_eq!(metrics.mounts, 0);
    }
}

//! Simulated card slot for hardware-free environments and tests.
//!
//! A [`SimulatedSlot`] models a detect switch, an SD bus and a FAT-like
//! filesystem driver sharing one card. The slot handle controls the
//! physical side (insert, remove, bounce, medium, fault injection) while
//! [`SimulatedSlot::peripherals`] hands out the collaborator implementations
//! that the daemon consumes.
//!
//! Presence is a time line of `(instant, present)` entries read against the
//! slot's [`Clock`], so the same slot works with [`SystemClock`] in threaded
//! tests and with [`ManualClock`](crate::clock::ManualClock) in
//! deterministic ones. Changes applied "now" fire the simulated edge
//! interrupt; changes scheduled in the future are only seen by polling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{SharedClock, SystemClock};
use crate::config::MountOptions;
use crate::detect::{DetectLine, DetectLineError, WakeSignal};
use crate::lifecycle::CardPeripherals;
use crate::pin::{Level, Polarity};
use crate::storage::{BusParams, Filesystem, StorageBus, StorageError, StorageErrorKind};

/// Open-file limit reported by the simulated driver.
pub const SIM_MAX_OPEN_FILES: u32 = 16;

/// What the inserted card carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Medium {
    /// A valid filesystem.
    #[default]
    Formatted,
    /// Blank medium, no filesystem.
    Unformatted,
    /// Damaged filesystem.
    Corrupt,
}

/// Call counters recorded by the simulated collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimCounters {
    /// `StorageBus::initialize` calls.
    pub bus_inits: u32,
    /// `StorageBus::release` calls.
    pub bus_releases: u32,
    /// `Filesystem::mount` calls.
    pub mounts: u32,
    /// `Filesystem::format` calls.
    pub formats: u32,
    /// `Filesystem::flush` calls.
    pub flushes: u32,
    /// `Filesystem::unmount` calls.
    pub unmounts: u32,
    /// Interrupts delivered to an armed handler.
    pub interrupts: u32,
}

impl SimCounters {
    /// Mount and unmount calls combined.
    #[must_use]
    pub fn mount_unmount_calls(&self) -> u32 {
        self.mounts.saturating_add(self.unmounts)
    }
}

#[derive(Debug)]
struct SlotInner {
    timeline: Vec<(Instant, bool)>,
    medium: Medium,
    wake: Option<WakeSignal>,
    fail_arm: bool,
    transient_failures: u32,
    transient_kind: StorageErrorKind,
    fail_format: bool,
    fail_flush: bool,
    fail_unmount: bool,
    mount_delay: Duration,
    bus_up: bool,
    mounted: bool,
    counters: SimCounters,
}

impl SlotInner {
    fn present_at(&self, now: Instant) -> bool {
        self.timeline
            .iter()
            .rev()
            .find(|(at, _)| *at <= now)
            .is_some_and(|(_, present)| *present)
    }

    fn push(&mut self, at: Instant, present: bool) {
        let index = self.timeline.partition_point(|(t, _)| *t <= at);
        self.timeline.insert(index, (at, present));
    }

    fn fire_interrupt(&mut self) {
        if let Some(wake) = &self.wake {
            wake.notify();
            self.counters.interrupts = self.counters.interrupts.saturating_add(1);
        }
    }
}

/// Simulated card slot.
///
/// Cloning yields another handle to the same slot.
#[derive(Clone)]
pub struct SimulatedSlot {
    inner: Arc<Mutex<SlotInner>>,
    clock: SharedClock,
}

impl SimulatedSlot {
    /// Create an empty slot on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty slot reading presence against `clock`.
    #[must_use]
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotInner {
                timeline: Vec::new(),
                medium: Medium::default(),
                wake: None,
                fail_arm: false,
                transient_failures: 0,
                transient_kind: StorageErrorKind::Timeout,
                fail_format: false,
                fail_flush: false,
                fail_unmount: false,
                mount_delay: Duration::ZERO,
                bus_up: false,
                mounted: false,
                counters: SimCounters::default(),
            })),
            clock,
        }
    }

    /// Seat a card now.
    pub fn insert(&self) {
        self.set_present(true);
    }

    /// Pull the card now.
    pub fn remove(&self) {
        self.set_present(false);
    }

    /// Change presence now and fire the edge interrupt.
    pub fn set_present(&self, present: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let before = inner.present_at(now);
        inner.push(now, present);
        if before != present {
            inner.fire_interrupt();
        }
    }

    /// Schedule a presence change `delay` from now.
    pub fn set_present_after(&self, delay: Duration, present: bool) {
        let now = self.clock.now();
        let at = now.checked_add(delay).unwrap_or(now);
        self.inner.lock().push(at, present);
    }

    /// Schedule `toggles` alternating edges `period` apart, starting now.
    ///
    /// The first edge inverts the current presence. An even count leaves the
    /// slot where it started.
    pub fn schedule_bounce(&self, toggles: u32, period: Duration) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let mut present = inner.present_at(now);
        let mut at = now;
        for _ in 0..toggles {
            present = !present;
            inner.push(at, present);
            at = at.checked_add(period).unwrap_or(at);
        }
        inner.fire_interrupt();
    }

    /// Choose the medium seen by the next mount.
    pub fn set_medium(&self, medium: Medium) {
        self.inner.lock().medium = medium;
    }

    /// Make the next `count` bus initializations fail with `kind`.
    pub fn fail_next_inits(&self, count: u32, kind: StorageErrorKind) {
        let mut inner = self.inner.lock();
        inner.transient_failures = count;
        inner.transient_kind = kind;
    }

    /// Make interrupt registration fail.
    pub fn fail_interrupt_setup(&self, fail: bool) {
        self.inner.lock().fail_arm = fail;
    }

    /// Make formatting fail.
    pub fn fail_format(&self, fail: bool) {
        self.inner.lock().fail_format = fail;
    }

    /// Make flush and unmount report errors.
    pub fn fail_unmount(&self, fail: bool) {
        let mut inner = self.inner.lock();
        inner.fail_flush = fail;
        inner.fail_unmount = fail;
    }

    /// Block every mount call for `delay` on the slot's clock.
    pub fn set_mount_delay(&self, delay: Duration) {
        self.inner.lock().mount_delay = delay;
    }

    /// Physical presence right now.
    #[must_use]
    pub fn is_present(&self) -> bool {
        let now = self.clock.now();
        self.inner.lock().present_at(now)
    }

    /// Check if the simulated driver has the volume mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.lock().mounted
    }

    /// Check if an interrupt handler is registered.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.lock().wake.is_some()
    }

    /// Current medium.
    #[must_use]
    pub fn medium(&self) -> Medium {
        self.inner.lock().medium
    }

    /// Snapshot of call counters.
    #[must_use]
    pub fn counters(&self) -> SimCounters {
        self.inner.lock().counters
    }

    /// Detect line wired to this slot.
    #[must_use]
    pub fn detect_line(&self, polarity: Polarity) -> SimDetectLine {
        SimDetectLine {
            slot: self.clone(),
            polarity,
        }
    }

    /// Bus wired to this slot.
    #[must_use]
    pub fn bus(&self) -> SimBus {
        SimBus { slot: self.clone() }
    }

    /// Filesystem driver wired to this slot.
    #[must_use]
    pub fn filesystem(&self) -> SimFilesystem {
        SimFilesystem { slot: self.clone() }
    }

    /// All three collaborators, ready for `SdCardDaemon::create`.
    #[must_use]
    pub fn peripherals(&self, polarity: Polarity) -> CardPeripherals {
        CardPeripherals::new(self.detect_line(polarity), self.bus(), self.filesystem())
    }
}

impl Default for SimulatedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SimulatedSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SimulatedSlot")
            .field("medium", &inner.medium)
            .field("mounted", &inner.mounted)
            .field("counters", &inner.counters)
            .finish_non_exhaustive()
    }
}

/// Simulated card detect input.
#[derive(Debug)]
pub struct SimDetectLine {
    slot: SimulatedSlot,
    polarity: Polarity,
}

impl DetectLine for SimDetectLine {
    fn level(&self) -> Level {
        self.polarity.level_for(self.slot.is_present())
    }

    fn arm_interrupt(&mut self, wake: WakeSignal) -> Result<(), DetectLineError> {
        let mut inner = self.slot.inner.lock();
        if inner.fail_arm {
            return Err(DetectLineError::new("interrupt registration refused"));
        }
        inner.wake = Some(wake);
        Ok(())
    }

    fn disarm_interrupt(&mut self) {
        self.slot.inner.lock().wake = None;
    }
}

/// Simulated SD bus.
#[derive(Debug)]
pub struct SimBus {
    slot: SimulatedSlot,
}

impl StorageBus for SimBus {
    fn initialize(&mut self, _params: &BusParams) -> Result<(), StorageError> {
        let now = self.slot.clock.now();
        let mut inner = self.slot.inner.lock();
        inner.counters.bus_inits = inner.counters.bus_inits.saturating_add(1);
        if !inner.present_at(now) {
            return Err(StorageError::new(StorageErrorKind::Timeout, "no card response"));
        }
        if inner.transient_failures > 0 {
            inner.transient_failures = inner.transient_failures.saturating_sub(1);
            return Err(StorageError::new(inner.transient_kind, "injected bus fault"));
        }
        inner.bus_up = true;
        Ok(())
    }

    fn release(&mut self) -> Result<(), StorageError> {
        let mut inner = self.slot.inner.lock();
        inner.counters.bus_releases = inner.counters.bus_releases.saturating_add(1);
        inner.bus_up = false;
        Ok(())
    }
}

/// Simulated filesystem driver.
#[derive(Debug)]
pub struct SimFilesystem {
    slot: SimulatedSlot,
}

impl Filesystem for SimFilesystem {
    fn max_open_files_supported(&self) -> u32 {
        SIM_MAX_OPEN_FILES
    }

    fn mount(&mut self, _options: &MountOptions) -> Result<(), StorageError> {
        let delay = {
            let mut inner = self.slot.inner.lock();
            inner.counters.mounts = inner.counters.mounts.saturating_add(1);
            inner.mount_delay
        };
        self.slot.clock.sleep(delay);

        let now = self.slot.clock.now();
        let mut inner = self.slot.inner.lock();
        if !inner.present_at(now) {
            return Err(StorageError::new(StorageErrorKind::Timeout, "card removed during mount"));
        }
        if !inner.bus_up {
            return Err(StorageError::new(StorageErrorKind::Io, "bus not initialized"));
        }
        match inner.medium {
            Medium::Formatted => {
                inner.mounted = true;
                Ok(())
            }
            Medium::Unformatted => Err(StorageError::new(
                StorageErrorKind::NoFilesystem,
                "no FAT volume found",
            )),
            Medium::Corrupt => Err(StorageError::new(
                StorageErrorKind::Corrupt,
                "FAT boot sector invalid",
            )),
        }
    }

    fn format(&mut self, _options: &MountOptions) -> Result<(), StorageError> {
        let mut inner = self.slot.inner.lock();
        inner.counters.formats = inner.counters.formats.saturating_add(1);
        if inner.fail_format {
            return Err(StorageError::new(StorageErrorKind::Io, "write protected"));
        }
        inner.medium = Medium::Formatted;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let now = self.slot.clock.now();
        let mut inner = self.slot.inner.lock();
        inner.counters.flushes = inner.counters.flushes.saturating_add(1);
        if inner.fail_flush || !inner.present_at(now) {
            return Err(StorageError::new(StorageErrorKind::Io, "flush failed"));
        }
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), StorageError> {
        let mut inner = self.slot.inner.lock();
        inner.counters.unmounts = inner.counters.unmounts.saturating_add(1);
        let was_mounted = inner.mounted;
        inner.mounted = false;
        if inner.fail_unmount {
            return Err(StorageError::new(StorageErrorKind::Io, "unmount failed"));
        }
        if !was_mounted {
            return Err(StorageError::new(StorageErrorKind::NotMounted, "volume not mounted"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::wake_channel;

    #[test]
    fn test_timeline_follows_clock() {
        let clock = ManualClock::new();
        let slot = SimulatedSlot::with_clock(Arc::new(clock.clone()));

        slot.set_present_after(Duration::from_millis(50), true);
        assert!(!slot.is_present());

        clock.advance(Duration::from_millis(50));
        assert!(slot.is_present());
    }

    #[test]
    fn test_bounce_schedule_even_count_returns_to_start() {
        let clock = ManualClock::new();
        let slot = SimulatedSlot::with_clock(Arc::new(clock.clone()));

        slot.schedule_bounce(4, Duration::from_millis(2));
        assert!(slot.is_present());
        clock.advance(Duration::from_millis(2));
        assert!(!slot.is_present());
        clock.advance(Duration::from_millis(10));
        assert!(!slot.is_present());
    }

    #[test]
    fn test_insert_fires_armed_interrupt() -> Result<(), DetectLineError> {
        let slot = SimulatedSlot::new();
        let mut line = slot.detect_line(Polarity::ActiveLow);
        let (signal, receiver) = wake_channel();
        line.arm_interrupt(signal)?;

        slot.insert();
        assert!(receiver.is_pending());
        assert_eq!(line.level(), Level::Low);
        assert_eq!(slot.counters().interrupts, 1);
        Ok(())
    }

    #[test]
    fn test_unformatted_medium_refuses_mount_until_formatted() -> Result<(), StorageError> {
        let slot = SimulatedSlot::new();
        slot.insert();
        slot.set_medium(Medium::Unformatted);
        let mut bus = slot.bus();
        let mut fs = slot.filesystem();
        let options = MountOptions::default();

        bus.initialize(&BusParams::default())?;
        let err = fs.mount(&options).err();
        assert_eq!(err.map(|e| e.kind()), Some(StorageErrorKind::NoFilesystem));

        fs.format(&options)?;
        fs.mount(&options)?;
        assert!(slot.is_mounted());
        Ok(())
    }

    #[test]
    fn test_injected_init_failures_are_consumed() {
        let slot = SimulatedSlot::new();
        slot.insert();
        slot.fail_next_inits(2, StorageErrorKind::Busy);
        let mut bus = slot.bus();

        assert!(bus.initialize(&BusParams::default()).is_err());
        assert!(bus.initialize(&BusParams::default()).is_err());
        assert!(bus.initialize(&BusParams::default()).is_ok());
        assert_eq!(slot.counters().bus_inits, 3);
    }
}

//! Pin identifiers, logic levels and pin reservation.
//!
//! A [`PinRegistry`] is an explicitly constructed service shared by every
//! component that claims GPIO lines. Reserving a pin returns a
//! [`PinReservation`] guard; dropping the guard releases the pin.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DaemonError, DaemonResult};

/// GPIO pin number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(u8);

impl PinId {
    /// Create a pin identifier.
    #[must_use]
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    /// Raw pin number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }
}

impl core::fmt::Display for PinId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

/// Digital logic level read from an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Line reads low.
    Low,
    /// Line reads high.
    High,
}

impl Level {
    /// Check if the level is high.
    #[must_use]
    pub fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

impl core::ops::Not for Level {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Low => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// Which level of the detect line means "card present".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Detect switch pulls the line low when a card is seated.
    #[default]
    ActiveLow,
    /// Detect switch drives the line high when a card is seated.
    ActiveHigh,
}

impl Polarity {
    /// Interpret a level as card presence.
    #[must_use]
    pub fn is_present(self, level: Level) -> bool {
        match self {
            Self::ActiveLow => !level.is_high(),
            Self::ActiveHigh => level.is_high(),
        }
    }

    /// Level the line shows while a card is seated.
    #[must_use]
    pub fn active_level(self) -> Level {
        match self {
            Self::ActiveLow => Level::Low,
            Self::ActiveHigh => Level::High,
        }
    }

    /// Level the line shows for a given presence.
    #[must_use]
    pub fn level_for(self, present: bool) -> Level {
        if present {
            self.active_level()
        } else {
            !self.active_level()
        }
    }
}

#[derive(Debug)]
struct RegistryInner {
    pin_count: u8,
    unavailable: BTreeSet<PinId>,
    reserved: BTreeMap<PinId, String>,
}

/// Tracks which GPIO pins are claimed and by whom.
///
/// Cloning the registry yields another handle to the same table.
#[derive(Debug, Clone)]
pub struct PinRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PinRegistry {
    /// Create a registry for a chip exposing `pin_count` pins (`0..pin_count`).
    #[must_use]
    pub fn new(pin_count: u8) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                pin_count,
                unavailable: BTreeSet::new(),
                reserved: BTreeMap::new(),
            })),
        }
    }

    /// Mark pins that can never be claimed (strapping, flash, etc.).
    #[must_use]
    pub fn with_unavailable(self, pins: impl IntoIterator<Item = PinId>) -> Self {
        self.inner.lock().unavailable.extend(pins);
        self
    }

    /// Check whether a pin exists and is usable at all.
    #[must_use]
    pub fn is_valid(&self, pin: PinId) -> bool {
        let inner = self.inner.lock();
        pin.number() < inner.pin_count && !inner.unavailable.contains(&pin)
    }

    /// Check whether a pin currently has an owner.
    #[must_use]
    pub fn is_reserved(&self, pin: PinId) -> bool {
        self.inner.lock().reserved.contains_key(&pin)
    }

    /// Owner of a reserved pin.
    #[must_use]
    pub fn owner(&self, pin: PinId) -> Option<String> {
        self.inner.lock().reserved.get(&pin).cloned()
    }

    /// Reserve a pin for exclusive use.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPin`] for pins that do not exist or are
    /// unavailable, and [`DaemonError::PinInUse`] if another owner holds it.
    pub fn reserve(&self, pin: PinId, owner: impl Into<String>) -> DaemonResult<PinReservation> {
        let mut inner = self.inner.lock();
        if pin.number() >= inner.pin_count || inner.unavailable.contains(&pin) {
            return Err(ConfigError::InvalidPin(pin).into());
        }
        if let Some(current) = inner.reserved.get(&pin) {
            return Err(DaemonError::pin_in_use(pin, current.clone()));
        }
        inner.reserved.insert(pin, owner.into());
        Ok(PinReservation {
            pin,
            registry: Arc::clone(&self.inner),
        })
    }
}

/// Exclusive claim on a pin; released on drop.
#[derive(Debug)]
pub struct PinReservation {
    pin: PinId,
    registry: Arc<Mutex<RegistryInner>>,
}

impl PinReservation {
    /// The reserved pin.
    #[must_use]
    pub fn pin(&self) -> PinId {
        self.pin
    }
}

impl Drop for PinReservation {
    fn drop(&mut self) {
        self.registry.lock().reserved.remove(&self.pin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_polarity_mapping() {
        assert!(Polarity::ActiveLow.is_present(Level::Low));
        assert!(!Polarity::ActiveLow.is_present(Level::High));
        assert!(Polarity::ActiveHigh.is_present(Level::High));
        assert_eq!(Polarity::ActiveLow.level_for(true), Level::Low);
        assert_eq!(Polarity::ActiveHigh.level_for(false), Level::Low);
        assert_eq!(!Level::Low, Level::High);
        assert!(Polarity::ActiveHigh.active_level().is_high());
        for polarity in [Polarity::ActiveLow, Polarity::ActiveHigh] {
            for present in [true, false] {
                assert_eq!(polarity.is_present(polarity.level_for(present)), present);
            }
        }
    }

    #[test]
    fn test_reserve_and_release() -> TestResult {
        let registry = PinRegistry::new(40);
        let pin = PinId::new(34);

        let guard = registry.reserve(pin, "sdcard")?;
        assert!(registry.is_reserved(pin));
        assert_eq!(registry.owner(pin).as_deref(), Some("sdcard"));

        drop(guard);
        assert!(!registry.is_reserved(pin));
        Ok(())
    }

    #[test]
    fn test_double_reservation_rejected() -> TestResult {
        let registry = PinRegistry::new(40);
        let _guard = registry.reserve(PinId::new(5), "display")?;

        let result = registry.reserve(PinId::new(5), "sdcard");
        assert!(matches!(result, Err(DaemonError::PinInUse { .. })));
        Ok(())
    }

    #[test]
    fn test_invalid_pins_rejected() {
        let registry = PinRegistry::new(40).with_unavailable([PinId::new(6)]);

        assert!(!registry.is_valid(PinId::new(40)));
        assert!(!registry.is_valid(PinId::new(6)));
        assert!(registry.is_valid(PinId::new(34)));

        let result = registry.reserve(PinId::new(6), "sdcard");
        assert!(matches!(
            result,
            Err(DaemonError::Config(ConfigError::InvalidPin(_)))
        ));
    }
}

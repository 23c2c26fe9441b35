//! Daemon configuration.
//!
//! A [`DaemonConfig`] is supplied once to
//! [`SdCardDaemon::create`](crate::SdCardDaemon::create) and is immutable
//! afterwards. Every range check lives in [`DaemonConfig::validate`]; the
//! driver-dependent `max_open_files` limit is checked again at create time.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pin::{PinId, Polarity};
pub use crate::retry::RetryPolicy;
use crate::storage::BusParams;

/// Highest task priority accepted.
pub const MAX_TASK_PRIORITY: u8 = 24;

/// Absolute ceiling for `max_open_files`, regardless of driver.
pub const MAX_OPEN_FILES_LIMIT: u32 = 64;

/// Smallest accepted stack for the background task.
pub const MIN_TASK_STACK_SIZE: usize = 16 * 1024;

/// Filesystem mount options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountOptions {
    /// Format the medium when it cannot be mounted, then retry once.
    pub format_if_mount_failed: bool,
    /// Size of the filesystem's open-file table.
    pub max_open_files: u32,
    /// Cluster size used when formatting; 0 lets the driver choose.
    pub allocation_unit_size: u32,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            format_if_mount_failed: false,
            max_open_files: 4,
            allocation_unit_size: 0,
        }
    }
}

impl MountOptions {
    /// Validate the options.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_OPEN_FILES_LIMIT).contains(&self.max_open_files) {
            return Err(ConfigError::invalid_field(
                "mount.max_open_files",
                format!("must be between 1 and {MAX_OPEN_FILES_LIMIT}"),
            ));
        }
        let unit = self.allocation_unit_size;
        if unit != 0 && (!unit.is_power_of_two() || !(512..=65_536).contains(&unit)) {
            return Err(ConfigError::invalid_field(
                "mount.allocation_unit_size",
                "must be 0 or a power of two between 512 and 65536",
            ));
        }
        Ok(())
    }

    /// Check `max_open_files` against a driver's limit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManyOpenFiles`] if the driver cannot honor it.
    pub fn check_driver_limit(&self, limit: u32) -> Result<(), ConfigError> {
        if self.max_open_files > limit {
            return Err(ConfigError::TooManyOpenFiles {
                requested: self.max_open_files,
                limit,
            });
        }
        Ok(())
    }
}

/// Debounce filter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Consecutive agreeing samples needed to accept a transition.
    pub samples: u32,
    /// Quiet interval between samples.
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            samples: 3,
            interval: Duration::from_millis(20),
        }
    }
}

impl DebounceConfig {
    /// Validate the debounce parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=32).contains(&self.samples) {
            return Err(ConfigError::invalid_field(
                "debounce.samples",
                "must be between 1 and 32",
            ));
        }
        if !(Duration::from_millis(1)..=Duration::from_secs(1)).contains(&self.interval) {
            return Err(ConfigError::invalid_field(
                "debounce.interval",
                "must be between 1ms and 1s",
            ));
        }
        Ok(())
    }

    /// Worst-case time to confirm one transition.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.interval.saturating_mul(self.samples.saturating_sub(1))
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Filesystem mount options.
    pub mount: MountOptions,
    /// Card detect input.
    pub detect_pin: PinId,
    /// Level meaning "card present".
    pub detect_polarity: Polarity,
    /// Background task priority (higher is more important).
    pub task_priority: u8,
    /// Background task stack size in bytes.
    pub task_stack_size: usize,
    /// Background task name.
    pub task_name: String,
    /// Debounce parameters.
    pub debounce: DebounceConfig,
    /// Mount retry policy.
    pub retry: RetryPolicy,
    /// Storage bus parameters.
    pub bus: BusParams,
    /// Fallback re-poll period when no interrupt arrives.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mount: MountOptions::default(),
            detect_pin: PinId::new(34),
            detect_polarity: Polarity::default(),
            task_priority: 3,
            task_stack_size: 64 * 1024,
            task_name: String::from("sdcard-daemon"),
            debounce: DebounceConfig::default(),
            retry: RetryPolicy::default(),
            bus: BusParams::default(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl DaemonConfig {
    /// Create a configuration for a detect pin with defaults elsewhere.
    #[must_use]
    pub fn new(detect_pin: PinId) -> Self {
        Self {
            detect_pin,
            ..Self::default()
        }
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mount.validate()?;
        if self.task_priority > MAX_TASK_PRIORITY {
            return Err(ConfigError::UnsupportedPriority {
                priority: self.task_priority,
                max: MAX_TASK_PRIORITY,
            });
        }
        if self.task_stack_size < MIN_TASK_STACK_SIZE {
            return Err(ConfigError::invalid_field(
                "task_stack_size",
                format!("must be at least {MIN_TASK_STACK_SIZE} bytes"),
            ));
        }
        if self.task_name.is_empty() {
            return Err(ConfigError::invalid_field(
                "task_name",
                "must not be empty",
            ));
        }
        self.debounce.validate()?;
        self.retry.validate()?;
        if !matches!(self.bus.bus_width, 1 | 4 | 8) {
            return Err(ConfigError::invalid_field(
                "bus.bus_width",
                "must be 1, 4 or 8",
            ));
        }
        if self.bus.frequency_khz == 0 {
            return Err(ConfigError::invalid_field(
                "bus.frequency_khz",
                "must be greater than 0",
            ));
        }
        if self.bus.command_timeout.is_zero() {
            return Err(ConfigError::invalid_field(
                "bus.command_timeout",
                "must be greater than 0",
            ));
        }
        if !(Duration::from_millis(10)..=Duration::from_secs(60)).contains(&self.poll_interval) {
            return Err(ConfigError::invalid_field(
                "poll_interval",
                "must be between 10ms and 60s",
            ));
        }
        Ok(())
    }
}

/// Builder for `DaemonConfig`.
#[derive(Debug, Default)]
pub struct DaemonConfigBuilder {
    config: DaemonConfig,
}

impl DaemonConfigBuilder {
    /// Set the card detect pin.
    #[must_use]
    pub fn detect_pin(mut self, pin: PinId) -> Self {
        self.config.detect_pin = pin;
        self
    }

    /// Set the detect line polarity.
    #[must_use]
    pub fn detect_polarity(mut self, polarity: Polarity) -> Self {
        self.config.detect_polarity = polarity;
        self
    }

    /// Format the card when mounting fails.
    #[must_use]
    pub fn format_if_mount_failed(mut self, enabled: bool) -> Self {
        self.config.mount.format_if_mount_failed = enabled;
        self
    }

    /// Set the open-file table size.
    #[must_use]
    pub fn max_open_files(mut self, count: u32) -> Self {
        self.config.mount.max_open_files = count;
        self
    }

    /// Set the allocation unit used when formatting.
    #[must_use]
    pub fn allocation_unit_size(mut self, bytes: u32) -> Self {
        self.config.mount.allocation_unit_size = bytes;
        self
    }

    /// Set the background task priority.
    #[must_use]
    pub fn task_priority(mut self, priority: u8) -> Self {
        self.config.task_priority = priority;
        self
    }

    /// Set the background task stack size.
    #[must_use]
    pub fn task_stack_size(mut self, bytes: usize) -> Self {
        self.config.task_stack_size = bytes;
        self
    }

    /// Set the background task name.
    #[must_use]
    pub fn task_name(mut self, name: impl Into<String>) -> Self {
        self.config.task_name = name.into();
        self
    }

    /// Set the debounce sample count and interval.
    #[must_use]
    pub fn debounce(mut self, samples: u32, interval: Duration) -> Self {
        self.config.debounce = DebounceConfig { samples, interval };
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set the maximum mount attempts per insertion.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Set the storage bus parameters.
    #[must_use]
    pub fn bus(mut self, params: BusParams) -> Self {
        self.config.bus = params;
        self
    }

    /// Set the fallback poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<DaemonConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_ms {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// Deserialize from milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

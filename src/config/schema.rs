//! Configuration schema definitions.
//!
//! Every section deserializes with defaults, so a config file only needs the
//! keys it wants to change.

use super::error::{ConfigError, ConfigResult};
use crate::line::EventDelivery;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data/event listener thread tuning
    pub listener: ListenerConfig,
    /// Line event delivery
    pub events: EventsConfig,
    /// Port presence monitor
    pub monitor: MonitorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the listener threads cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.listener.read_chunk_size == 0 {
            return Err(ConfigError::validation(
                "listener.read_chunk_size",
                "must be greater than zero",
            ));
        }
        if self.listener.partial_buffer_capacity < self.listener.read_chunk_size {
            return Err(ConfigError::validation(
                "listener.partial_buffer_capacity",
                "must be at least read_chunk_size",
            ));
        }
        if self.listener.error_threshold == 0 {
            return Err(ConfigError::validation(
                "listener.error_threshold",
                "must be greater than zero",
            ));
        }
        if self.listener.wake_retry_ms == 0 {
            return Err(ConfigError::validation(
                "listener.wake_retry_ms",
                "must be greater than zero",
            ));
        }
        if self.events.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "events.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.monitor.enumeration_interval_ms == 0 {
            return Err(ConfigError::validation(
                "monitor.enumeration_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Listener thread section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bytes requested per read call
    pub read_chunk_size: usize,
    /// Capacity of the accumulator used across partial reads
    pub partial_buffer_capacity: usize,
    /// Consecutive wait errors per data-error notification
    pub error_threshold: u32,
    /// Pause after a wait error before waiting again (0 = none)
    pub error_backoff_ms: u64,
    /// Upper bound on joining a stopping listener thread
    pub join_timeout_ms: u64,
    /// Interval at which a stopping thread is woken again while joining
    pub wake_retry_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 1024,
            partial_buffer_capacity: 3072,
            error_threshold: 100,
            error_backoff_ms: 0,
            join_timeout_ms: 2000,
            wake_retry_ms: 10,
        }
    }
}

impl ListenerConfig {
    pub fn error_backoff(&self) -> Option<Duration> {
        (self.error_backoff_ms > 0).then(|| Duration::from_millis(self.error_backoff_ms))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn wake_retry(&self) -> Duration {
        Duration::from_millis(self.wake_retry_ms)
    }
}

/// Line event section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Delivery policy; `platform` picks the backend's natural behaviour
    pub delivery: DeliveryPolicy,
    /// Status poll interval for backends without a blocking status wait
    pub poll_interval_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryPolicy::Platform,
            poll_interval_ms: 500,
        }
    }
}

impl EventsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configured event delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    #[default]
    Platform,
    Always,
    OnChange,
}

impl DeliveryPolicy {
    /// The delivery to use given the backend's own default.
    pub fn resolve(self, platform_default: EventDelivery) -> EventDelivery {
        match self {
            DeliveryPolicy::Platform => platform_default,
            DeliveryPolicy::Always => EventDelivery::Always,
            DeliveryPolicy::OnChange => EventDelivery::OnChange,
        }
    }
}

/// Port presence monitor section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Kernel subsystem whose uevents are watched
    pub subsystem: String,
    /// Device type within the subsystem
    pub device_type: String,
    /// Pause after each accepted hot-plug event
    pub settle_delay_ms: u64,
    /// Rescan interval for enumeration-based monitoring
    pub enumeration_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            subsystem: "usb".to_string(),
            device_type: "usb_device".to_string(),
            settle_delay_ms: 500,
            enumeration_interval_ms: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn enumeration_interval(&self) -> Duration {
        Duration::from_millis(self.enumeration_interval_ms)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive: "trace", "debug", "info", "warn", "error", or an
    /// `EnvFilter` expression
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

//! Configuration section types.
//!
//! Every section rejects unknown fields and fills missing ones with
//! defaults, so a file only needs to name what it changes.

use std::time::Duration;

use portico_query::{CacheConfig, RetentionPolicy};
use portico_telemetry::{LogConfig, LogFormat, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

/// Telemetry section (`[telemetry]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Service name attached to every log line.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl TelemetrySection {
    /// Converts the section into a [`TelemetryConfig`].
    ///
    /// Settings the file cannot express keep their telemetry defaults.
    #[must_use]
    pub fn to_telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig::builder()
            .service_name(&self.service_name)
            .logging(LogConfig {
                enabled: self.logging.enabled,
                level: self.logging.level.clone(),
                format: self.logging.format,
                ..LogConfig::default()
            })
            .metrics(MetricsConfig {
                enabled: self.metrics.enabled,
                ..MetricsConfig::default()
            })
            .build()
    }
}

impl From<&TelemetrySection> for TelemetryConfig {
    fn from(section: &TelemetrySection) -> Self {
        section.to_telemetry_config()
    }
}

fn default_service_name() -> String {
    "portico".to_string()
}

/// Logging section (`[telemetry.logging]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directives (e.g. `"info"`, `"portico_query=debug,info"`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics section (`[telemetry.metrics]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Enable the Prometheus recorder.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Retention mode as written in configuration.
///
/// Mirrors [`RetentionPolicy`] without the grace duration, which lives in
/// its own field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    /// Evict as soon as the last subscriber leaves.
    Immediate,
    /// Evict after `grace_period_ms` without subscribers.
    #[default]
    GracePeriod,
    /// Never evict automatically.
    Pinned,
}

impl RetentionMode {
    /// Parses the configuration spelling of a mode.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "immediate" => Some(Self::Immediate),
            "grace_period" => Some(Self::GracePeriod),
            "pinned" => Some(Self::Pinned),
            _ => None,
        }
    }
}

/// Query cache section (`[query]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct QueryConfigSection {
    /// What happens to an entry once its last subscriber leaves.
    #[serde(default)]
    pub retention: RetentionMode,

    /// Grace period in milliseconds; only read when `retention` is
    /// `grace_period`.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// How long a settled result is served before it is refetched.
    /// Absent means results never go stale on their own.
    #[serde(default)]
    pub stale_time_ms: Option<u64>,
}

impl Default for QueryConfigSection {
    fn default() -> Self {
        Self {
            retention: RetentionMode::default(),
            grace_period_ms: default_grace_period_ms(),
            stale_time_ms: None,
        }
    }
}

impl QueryConfigSection {
    /// Returns the retention policy this section describes.
    #[must_use]
    pub const fn retention_policy(&self) -> RetentionPolicy {
        match self.retention {
            RetentionMode::Immediate => RetentionPolicy::Immediate,
            RetentionMode::GracePeriod => {
                RetentionPolicy::GracePeriod(Duration::from_millis(self.grace_period_ms))
            }
            RetentionMode::Pinned => RetentionPolicy::Pinned,
        }
    }

    /// Converts the section into a [`CacheConfig`].
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use portico_config::{QueryConfigSection, RetentionMode};
    /// use portico_query::RetentionPolicy;
    ///
    /// let section = QueryConfigSection {
    ///     retention: RetentionMode::Immediate,
    ///     stale_time_ms: Some(500),
    ///     ..Default::default()
    /// };
    ///
    /// let config = section.to_cache_config();
    /// assert_eq!(config.retention, RetentionPolicy::Immediate);
    /// assert_eq!(config.stale_time, Some(Duration::from_millis(500)));
    /// ```
    #[must_use]
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            retention: self.retention_policy(),
            stale_time: self.stale_time_ms.map(Duration::from_millis),
        }
    }
}

fn default_grace_period_ms() -> u64 {
    300_000
}

/// Pipeline section (`[pipeline]`).
///
/// Stage lists are assembled in code; these switches only control the
/// built-in stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// Reuse a well-formed `x-request-id` sent by the client.
    #[serde(default)]
    pub trust_incoming_request_id: bool,

    /// Append a `server-timing` header to every response.
    #[serde(default)]
    pub server_timing: bool,
}

fn default_true() -> bool {
    true
}

//! Top-level configuration type.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, PipelineSection, QueryConfigSection, RetentionMode, TelemetrySection};

/// Complete Portico configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use portico_config::PorticoConfig;
///
/// let config = PorticoConfig::default();
/// assert_eq!(config.telemetry.service_name, "portico");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PorticoConfig {
    /// Telemetry configuration (logging, metrics).
    #[serde(default)]
    pub telemetry: TelemetrySection,

    /// Query cache configuration.
    #[serde(default)]
    pub query: QueryConfigSection,

    /// Built-in pipeline stage switches.
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl PorticoConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `telemetry.service_name` is empty
    /// - `telemetry.logging.level` is not a valid filter while logging is enabled
    /// - `query.grace_period_ms` is zero while `query.retention` is `grace_period`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telemetry.service_name.trim().is_empty() {
            return Err(ConfigError::validation_error(
                "telemetry.service_name must not be empty",
            ));
        }

        if self.telemetry.logging.enabled
            && portico_telemetry::logging::create_env_filter(&self.telemetry.logging.level)
                .is_err()
        {
            return Err(ConfigError::validation_error(format!(
                "telemetry.logging.level is not a valid filter: {}",
                self.telemetry.logging.level
            )));
        }

        if self.query.retention == RetentionMode::GracePeriod && self.query.grace_period_ms == 0 {
            return Err(ConfigError::validation_error(
                "query.grace_period_ms must be greater than 0 when retention is 'grace_period'",
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// - Pretty, debug-level logs
    /// - Short grace period so evictions are easy to observe
    /// - Server timing on
    ///
    /// # Example
    ///
    /// ```
    /// use portico_config::PorticoConfig;
    ///
    /// let config = PorticoConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = portico_telemetry::LogFormat::Pretty;

        config.query.grace_period_ms = 5_000;

        config.pipeline.trust_incoming_request_id = true;
        config.pipeline.server_timing = true;

        config
    }

    /// Create a production configuration preset.
    ///
    /// # Example
    ///
    /// ```
    /// use portico_config::PorticoConfig;
    ///
    /// let config = PorticoConfig::production();
    /// assert_eq!(config.telemetry.logging.format, portico_telemetry::LogFormat::Json);
    /// assert!(!config.pipeline.trust_incoming_request_id);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.telemetry.logging.level = "info".to_string();
        config.telemetry.logging.format = portico_telemetry::LogFormat::Json;

        config.pipeline.trust_incoming_request_id = false;
        config.pipeline.server_timing = false;

        config
    }
}

//! Observability for Portico.
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: Prometheus text exposition via the `metrics` facade
//!
//! Library crates only *emit* through the `tracing` and `metrics` macros.
//! Installing a subscriber and a recorder is the application's decision,
//! made once at startup with [`init_telemetry`] (or [`init_logging`] and
//! [`init_metrics`] separately). Until then every emission is a no-op.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `portico_stage_duration_seconds` | Histogram | `stage`, `phase` |
//! | `portico_stage_failures_total` | Counter | `stage`, `phase` |
//! | `portico_short_circuits_total` | Counter | `stage`, `phase` |
//! | `portico_query_executions_total` | Counter | `outcome` |
//! | `portico_query_cache_hits_total` | Counter | - |
//! | `portico_query_cache_misses_total` | Counter | - |
//! | `portico_query_dedup_joins_total` | Counter | - |
//! | `portico_query_evictions_total` | Counter | - |
//!
//! # Example
//!
//! ```rust,no_run
//! use portico_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("blog")
//!     .build();
//!
//! let registry = init_telemetry(&config).expect("telemetry already initialized");
//!
//! if let Some(registry) = registry {
//!     println!("{}", registry.render());
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and metrics.
///
/// Returns the metrics registry when metrics are enabled.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize,
/// including when one was already initialized in this process.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)
}

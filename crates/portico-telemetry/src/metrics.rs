//! Prometheus metrics for Portico.
//!
//! The pipeline and the query cache emit through the `metrics` facade using
//! the names in [`names`]. [`init_metrics`] installs a Prometheus recorder;
//! scraping is left to the application, which serves
//! [`MetricsRegistry::render`] from whatever endpoint it likes.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names.
pub mod names {
    /// Histogram of per-stage execution time.
    pub const STAGE_DURATION_SECONDS: &str = "portico_stage_duration_seconds";

    /// Counter of stages that raised, panicked or returned a malformed response.
    pub const STAGE_FAILURES_TOTAL: &str = "portico_stage_failures_total";

    /// Counter of stages that ended their phase with a terminal response.
    pub const SHORT_CIRCUITS_TOTAL: &str = "portico_short_circuits_total";

    /// Counter of finished query executions by `outcome`.
    pub const QUERY_EXECUTIONS_TOTAL: &str = "portico_query_executions_total";

    /// Counter of invocations served from a settled entry.
    pub const QUERY_CACHE_HITS_TOTAL: &str = "portico_query_cache_hits_total";

    /// Counter of invocations that started a new execution.
    pub const QUERY_CACHE_MISSES_TOTAL: &str = "portico_query_cache_misses_total";

    /// Counter of invocations that joined an in-flight execution.
    pub const QUERY_DEDUP_JOINS_TOTAL: &str = "portico_query_dedup_joins_total";

    /// Counter of evicted entries.
    pub const QUERY_EVICTIONS_TOTAL: &str = "portico_query_evictions_total";
}

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Histogram buckets for stage duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 100us .. 1s
            duration_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
        }
    }
}

/// Handle for rendering the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with the given handle.
    #[must_use]
    pub const fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// Returns `Ok(None)` when metrics are disabled.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` for an empty bucket list and
/// `TelemetryError::MetricsInit` if a global recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }

    if config.duration_buckets.is_empty() {
        return Err(TelemetryError::InvalidConfig(
            "duration_buckets must not be empty".to_string(),
        ));
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::STAGE_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle.clone());

    register_metric_descriptions();

    Ok(Some(MetricsRegistry::new(handle)))
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_histogram!(
        names::STAGE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent in one middleware stage"
    );
    describe_counter!(
        names::STAGE_FAILURES_TOTAL,
        "Middleware stages that failed or returned an invalid terminal response"
    );
    describe_counter!(
        names::SHORT_CIRCUITS_TOTAL,
        "Middleware stages that ended their phase with a terminal response"
    );
    describe_counter!(
        names::QUERY_EXECUTIONS_TOTAL,
        "Finished query executions by outcome"
    );
    describe_counter!(
        names::QUERY_CACHE_HITS_TOTAL,
        "Query invocations served from a settled cache entry"
    );
    describe_counter!(
        names::QUERY_CACHE_MISSES_TOTAL,
        "Query invocations that started a new execution"
    );
    describe_counter!(
        names::QUERY_DEDUP_JOINS_TOTAL,
        "Query invocations that joined an in-flight execution"
    );
    describe_counter!(names::QUERY_EVICTIONS_TOTAL, "Evicted query cache entries");
}

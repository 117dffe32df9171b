//! Typed configuration for Portico.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict parsing (fails on unknown fields)
//! - Layered loading (defaults → file → env)
//!
//! # Example
//!
//! ```no_run
//! use portico_config::ConfigLoader;
//! use portico_query::QueryCache;
//!
//! # fn main() -> Result<(), portico_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("portico.toml")?
//!     .with_env_prefix("PORTICO")
//!     .load()?;
//!
//! let cache: QueryCache<String> = QueryCache::with_config(config.query.to_cache_config());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [telemetry]
//! service_name = "blog"
//!
//! [telemetry.logging]
//! enabled = true
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//!
//! [query]
//! retention = "grace_period"   # or "immediate", "pinned"
//! grace_period_ms = 300000
//! stale_time_ms = 30000        # omit to keep results until invalidated
//!
//! [pipeline]
//! trust_incoming_request_id = false
//! server_timing = true
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `PORTICO__TELEMETRY__LOGGING__LEVEL=debug`
//! - `PORTICO__QUERY__RETENTION=pinned`
//! - `PORTICO__QUERY__STALE_TIME_MS=none`
//! - `PORTICO__PIPELINE__SERVER_TIMING=true`
//!
//! Unknown keys under the prefix are rejected.

#![doc(html_root_url = "https://docs.rs/portico-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::PorticoConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    LoggingSection, MetricsSection, PipelineSection, QueryConfigSection, RetentionMode,
    TelemetrySection,
};

//! # Portico
//!
//! Two independent pieces that sit on either side of a server function:
//!
//! - **Middleware pipeline** ([`middleware`]): ordered `on_request` and
//!   `on_before_response` stages around a route handler, with request-scoped
//!   locals, short-circuiting and well-defined header precedence
//! - **Query cache** ([`query`]): deduplicated, versioned results of
//!   server-function calls with invalidation and live subscriptions
//!
//! ## Architecture
//!
//! ```text
//! Request → on_request[..] → Handler ─┐
//!                              │      ↓
//!                              │   Response ← on_before_response[..]
//!                              ↓
//!                         QueryCache ← invoke / invalidate / subscribe
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use portico::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("portico.toml")?
//!     .with_env_prefix("PORTICO")
//!     .load()?;
//!
//! let _metrics = init_telemetry(&config.telemetry.to_telemetry_config())?;
//!
//! let pipeline = portico::pipeline_builder(&config.pipeline)
//!     .stage(FnStage::sync("auth", Phase::OnRequest, |ctx| {
//!         ctx.locals_mut().insert("user", "alice".to_string());
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! let posts: QueryCache<Vec<String>> = QueryCache::with_config(config.query.to_cache_config());
//! # let _ = (pipeline, posts);
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/portico/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use portico_core as core;

// Re-export middleware types
pub use portico_middleware as middleware;

// Re-export query cache types
pub use portico_query as query;

// Re-export telemetry
pub use portico_telemetry as telemetry;

// Re-export configuration
pub use portico_config as config;

use portico_config::PipelineSection;
use portico_middleware::stages::{RequestIdStage, ServerTimingStage};
use portico_middleware::PipelineBuilder;

/// Starts a pipeline builder with the built-in stages switched on by `section`.
///
/// The request-id stage is always installed as the first `on_request`
/// stage; `trust_incoming_request_id` decides whether a client-supplied
/// `x-request-id` is reused. With `server_timing` on, the server-timing
/// stage becomes the first `on_before_response` stage, so application
/// stages added afterwards can still overwrite its header.
///
/// # Example
///
/// ```
/// use portico::config::PipelineSection;
/// use portico::core::Phase;
///
/// let section = PipelineSection {
///     trust_incoming_request_id: false,
///     server_timing: true,
/// };
///
/// let pipeline = portico::pipeline_builder(&section).build().unwrap();
/// assert_eq!(pipeline.stage_names(Phase::OnRequest), vec!["request_id"]);
/// assert_eq!(pipeline.stage_names(Phase::OnBeforeResponse), vec!["server_timing"]);
/// ```
#[must_use]
pub fn pipeline_builder(section: &PipelineSection) -> PipelineBuilder {
    let builder = PipelineBuilder::new()
        .stage(RequestIdStage::new().with_trust_incoming(section.trust_incoming_request_id));

    if section.server_timing {
        builder.stage(ServerTimingStage::new())
    } else {
        builder
    }
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use portico::prelude::*;
/// ```
pub mod prelude {
    pub use portico_core::{
        Locals, Phase, Request, RequestContext, RequestId, Response, ResponseExt,
    };

    // Pipeline
    pub use portico_middleware::{
        BoxFuture, FnStage, Pipeline, PipelineBuilder, PipelineError, Stage, StageOutcome,
        StageResult,
    };

    // Query cache
    pub use portico_query::{
        CacheConfig, CacheStats, QueryCache, QueryError, QueryHandle, QueryKey, QuerySnapshot,
        QueryState, ReadableSlot, RetentionPolicy,
    };

    // Telemetry and configuration
    pub use portico_config::{ConfigError, ConfigLoader, PorticoConfig};
    pub use portico_telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
}

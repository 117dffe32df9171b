//! Server-Timing stage.
//!
//! Reports how long the request has been processing, measured from context
//! creation, in a `Server-Timing` response header:
//!
//! ```text
//! server-timing: total;dur=12.345
//! ```

use crate::stage::{BoxFuture, Stage, StageOutcome, StageResult};
use http::HeaderValue;
use portico_core::{Phase, RequestContext};

/// The `Server-Timing` header name.
pub const SERVER_TIMING_HEADER: &str = "server-timing";

/// Stage that appends a `total` metric to the `Server-Timing` header.
///
/// Existing `Server-Timing` values (e.g. set by the handler) are kept; the
/// `total` entry is appended next to them.
#[derive(Debug, Clone)]
pub struct ServerTimingStage {
    metric: String,
}

impl ServerTimingStage {
    /// Creates a stage reporting under the metric name `total`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_metric("total")
    }

    /// Creates a stage reporting under a custom metric name.
    #[must_use]
    pub fn with_metric(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
        }
    }
}

impl Default for ServerTimingStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ServerTimingStage {
    fn name(&self) -> &str {
        "server_timing"
    }

    fn phase(&self) -> Phase {
        Phase::OnBeforeResponse
    }

    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            let millis = ctx.elapsed().as_secs_f64() * 1000.0;
            let value = HeaderValue::from_str(&format!("{};dur={millis:.3}", self.metric))?;
            ctx.response_headers_mut()
                .append(SERVER_TIMING_HEADER, value);
            Ok(StageOutcome::Continue)
        })
    }
}

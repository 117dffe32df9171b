//! Request ID stage.
//!
//! Assigns every request a unique identifier, used for log correlation and
//! support references.
//!
//! ## Request ID Sources
//!
//! 1. **X-Request-ID header**: used when incoming IDs are trusted and the
//!    header holds a valid UUID
//! 2. **Generated UUID v7**: otherwise
//!
//! The ID is written to the context, stored in the locals under
//! [`REQUEST_ID_LOCAL`] for later stages and the handler, and echoed back in
//! the `X-Request-ID` response header.

use crate::stage::{BoxFuture, Stage, StageOutcome, StageResult};
use http::HeaderValue;
use portico_core::{Phase, RequestContext, RequestId};
use uuid::Uuid;

/// The header name for request ID propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The locals key the request ID is stored under.
pub const REQUEST_ID_LOCAL: &str = "request_id";

/// Stage that generates or extracts request IDs.
///
/// # Example
///
/// ```
/// use portico_middleware::stages::RequestIdStage;
/// use portico_middleware::Pipeline;
///
/// let pipeline = Pipeline::builder()
///     .on_request(RequestIdStage::new())
///     .build()
///     .unwrap();
/// # assert_eq!(pipeline.stage_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestIdStage {
    /// Whether to trust incoming request ID headers.
    ///
    /// Typically `false` for external traffic and `true` behind a trusted
    /// proxy or for service-to-service calls.
    trust_incoming: bool,
}

impl RequestIdStage {
    /// Creates a stage that always generates fresh IDs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stage that reuses valid incoming `X-Request-ID` headers.
    #[must_use]
    pub const fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    /// Sets whether incoming IDs are trusted.
    #[must_use]
    pub const fn with_trust_incoming(mut self, trust: bool) -> Self {
        self.trust_incoming = trust;
        self
    }

    fn extract_request_id(&self, ctx: &RequestContext) -> Option<RequestId> {
        if !self.trust_incoming {
            return None;
        }

        ctx.request_headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(RequestId::from_uuid)
    }
}

impl Stage for RequestIdStage {
    fn name(&self) -> &str {
        "request_id"
    }

    fn phase(&self) -> Phase {
        Phase::OnRequest
    }

    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            let request_id = self
                .extract_request_id(ctx)
                .unwrap_or_else(|| ctx.request_id());

            ctx.set_request_id(request_id);
            ctx.locals_mut().insert(REQUEST_ID_LOCAL, request_id);

            let value = HeaderValue::from_str(&request_id.to_string())?;
            ctx.response_headers_mut().insert(REQUEST_ID_HEADER, value);

            Ok(StageOutcome::Continue)
        })
    }
}

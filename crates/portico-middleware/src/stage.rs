//! The stage contract.
//!
//! A [`Stage`] is one named interceptor bound to a [`Phase`]. It receives
//! the request's [`RequestContext`] for the length of a single invocation
//! and tells the pipeline whether to continue or to stop with a terminal
//! response.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use portico_core::{Phase, RequestContext};
//! use portico_middleware::{BoxFuture, Stage, StageOutcome, StageResult};
//!
//! struct Maintenance;
//!
//! impl Stage for Maintenance {
//!     fn name(&self) -> &str {
//!         "maintenance"
//!     }
//!
//!     fn phase(&self) -> Phase {
//!         Phase::OnRequest
//!     }
//!
//!     fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, StageResult> {
//!         Box::pin(async move {
//!             let response = http::Response::builder()
//!                 .status(503)
//!                 .body(Full::new(Bytes::from("down for maintenance")));
//!             Ok(StageOutcome::from(response))
//!         })
//!     }
//! }
//! ```

use portico_core::{Phase, RequestContext, Response};
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a stage hands back to the pipeline.
///
/// `Err` means the stage raised; the pipeline reports it as
/// [`PipelineError::MiddlewareFailure`](crate::PipelineError::MiddlewareFailure).
pub type StageResult = anyhow::Result<StageOutcome>;

/// The non-error result of a stage invocation.
#[derive(Debug)]
pub enum StageOutcome {
    /// Keep going with the next stage.
    Continue,
    /// Stop the pipeline; this response becomes the final response.
    Respond(Response),
    /// The stage tried to stop the pipeline with something that is not a
    /// well-formed terminal response.
    Malformed(String),
}

impl StageOutcome {
    /// Wraps `response` as a terminal outcome, checking that it is well-formed.
    ///
    /// Informational (1xx) statuses cannot end a request and are reported as
    /// [`StageOutcome::Malformed`].
    #[must_use]
    pub fn respond(response: Response) -> Self {
        let status = response.status();
        if status.is_informational() {
            return Self::Malformed(format!(
                "status {status} cannot be used for a terminal response"
            ));
        }
        Self::Respond(response)
    }

    /// Returns `true` if the outcome stops the pipeline.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl From<()> for StageOutcome {
    fn from((): ()) -> Self {
        Self::Continue
    }
}

impl From<Response> for StageOutcome {
    fn from(response: Response) -> Self {
        Self::respond(response)
    }
}

impl From<Option<Response>> for StageOutcome {
    fn from(response: Option<Response>) -> Self {
        response.map_or(Self::Continue, Self::respond)
    }
}

impl From<http::Result<Response>> for StageOutcome {
    fn from(response: http::Result<Response>) -> Self {
        match response {
            Ok(response) => Self::respond(response),
            Err(e) => Self::Malformed(e.to_string()),
        }
    }
}

/// One interceptor bound to a lifecycle phase.
///
/// # Invariants
///
/// - A stage MUST NOT retain the context beyond its own invocation (the
///   borrow checker enforces this)
/// - A stage's only side channels to later stages are the response headers
///   and the request locals
pub trait Stage: Send + Sync + 'static {
    /// Name used in logs, metrics and errors.
    fn name(&self) -> &str;

    /// The phase this stage runs in.
    fn phase(&self) -> Phase;

    /// Runs the stage against the current request.
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StageResult>;
}

/// Async handler signature accepted by [`FnStage::new`].
type AsyncStageFn =
    dyn for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, StageResult> + Send + Sync;

/// Sync handler signature accepted by [`FnStage::sync`].
type SyncStageFn = dyn Fn(&mut RequestContext) -> StageResult + Send + Sync;

enum StageFn {
    Async(Box<AsyncStageFn>),
    Sync(Box<SyncStageFn>),
}

/// A stage built from a closure.
///
/// # Example
///
/// ```
/// use portico_core::Phase;
/// use portico_middleware::{FnStage, StageOutcome};
///
/// let stage = FnStage::new("lookup", Phase::OnRequest, |ctx| {
///     Box::pin(async move {
///         ctx.locals_mut().insert("user_id", 7_u64);
///         Ok(StageOutcome::Continue)
///     })
/// });
/// ```
pub struct FnStage {
    name: String,
    phase: Phase,
    func: StageFn,
}

impl FnStage {
    /// Creates a stage from an async closure.
    pub fn new<F>(name: impl Into<String>, phase: Phase, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, StageResult>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            phase,
            func: StageFn::Async(Box::new(func)),
        }
    }

    /// Creates a stage from a synchronous closure.
    ///
    /// The closure may return anything convertible into a [`StageOutcome`]:
    /// `()`, `Option<Response>`, `Response` or `http::Result<Response>`.
    pub fn sync<F, O>(name: impl Into<String>, phase: Phase, func: F) -> Self
    where
        F: Fn(&mut RequestContext) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Into<StageOutcome>,
    {
        Self {
            name: name.into(),
            phase,
            func: StageFn::Sync(Box::new(move |ctx: &mut RequestContext| {
                func(ctx).map(Into::into)
            })),
        }
    }
}

impl std::fmt::Debug for FnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StageResult> {
        match &self.func {
            StageFn::Async(func) => Box::pin(async move { func(ctx).await }),
            StageFn::Sync(func) => Box::pin(async move { func(ctx) }),
        }
    }
}

//! Declaration-ordered interception pipeline.
//!
//! The pipeline holds one ordered stage list per [`Phase`]. It is assembled
//! once at startup with [`PipelineBuilder`] and is immutable afterwards, so
//! a single `Pipeline` can be shared (e.g. behind an `Arc`) by every
//! in-flight request.
//!
//! ## Request lifecycle
//!
//! [`Pipeline::process`] drives one request end to end:
//!
//! 1. run `on_request` stages in order; a terminal response ends processing
//! 2. run the route handler
//! 3. merge the handler's response headers over the ones already set
//! 4. run `on_before_response` stages in order; a terminal response replaces
//!    the handler's response
//! 5. emit the handler's status and body with the merged headers
//!
//! Each phase is atomic with respect to response headers: if any stage in
//! the phase fails, header writes made earlier in that phase are rolled back
//! before the error is returned.

use crate::error::PipelineError;
use crate::stage::{BoxFuture, Stage, StageOutcome};
use futures_util::FutureExt;
use http::HeaderMap;
use metrics::{counter, histogram};
use portico_core::{Phase, RequestContext, Response};
use portico_telemetry::metrics::names;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// A type-erased stage that can be stored in a vector.
pub type BoxedStage = Arc<dyn Stage>;

/// The interception pipeline.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use http_body_util::Full;
/// use portico_core::{Phase, RequestContext};
/// use portico_middleware::{FnStage, Pipeline};
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::builder()
///     .stage(FnStage::sync("stamp", Phase::OnBeforeResponse, |ctx| {
///         ctx.response_headers_mut()
///             .insert("x-powered-by", http::HeaderValue::from_static("portico"));
///         Ok(())
///     }))
///     .build()
///     .unwrap();
///
/// let request = http::Request::builder()
///     .uri("/")
///     .body(Full::new(Bytes::new()))
///     .unwrap();
///
/// let response = pipeline
///     .process(RequestContext::new(request), |_ctx| {
///         Box::pin(async move {
///             Ok(http::Response::new(Full::new(Bytes::from("hello"))))
///         })
///     })
///     .await
///     .unwrap();
///
/// assert_eq!(response.headers()["x-powered-by"], "portico");
/// # });
/// ```
pub struct Pipeline {
    /// Stages run before the handler.
    on_request: Vec<BoxedStage>,

    /// Stages run after the handler.
    on_before_response: Vec<BoxedStage>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs every stage of `phase` against `ctx`, in declaration order.
    ///
    /// Returns `Ok(Some(response))` if a stage short-circuited, `Ok(None)` if
    /// every stage continued. On error the response headers are restored to
    /// what they were when the phase started.
    pub async fn run(
        &self,
        phase: Phase,
        ctx: &mut RequestContext,
    ) -> Result<Option<Response>, PipelineError> {
        let snapshot = ctx.response_headers().clone();

        match self.run_stages(phase, ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                *ctx.response_headers_mut() = snapshot;
                Err(err)
            }
        }
    }

    /// Processes one request through the full lifecycle.
    ///
    /// The context is consumed: once the final response is returned, neither
    /// the locals nor the response headers can be touched again.
    pub async fn process<H>(
        &self,
        mut ctx: RequestContext,
        handler: H,
    ) -> Result<Response, PipelineError>
    where
        H: for<'a> FnOnce(&'a mut RequestContext) -> BoxFuture<'a, anyhow::Result<Response>>
            + Send,
    {
        let span = info_span!(
            "pipeline.request",
            request_id = %ctx.request_id(),
            http.method = %ctx.method(),
            http.path = %ctx.path(),
        );

        async move {
            if let Some(response) = self.run(Phase::OnRequest, &mut ctx).await? {
                return Ok(response);
            }
            tracing::Span::current()
                .record("request_id", tracing::field::display(ctx.request_id()));

            let response = AssertUnwindSafe(async { handler(&mut ctx).await })
                .catch_unwind()
                .await
                .map_err(|panic| {
                    anyhow::anyhow!("route handler panicked: {}", panic_message(panic.as_ref()))
                })
                .and_then(|result| result)
                .map_err(PipelineError::Handler)?;

            let (mut parts, body) = response.into_parts();
            merge_headers(ctx.response_headers_mut(), &parts.headers);
            ctx.set_response_status(parts.status);

            if let Some(response) = self.run(Phase::OnBeforeResponse, &mut ctx).await? {
                return Ok(response);
            }

            parts.headers = ctx.take_response_headers();
            let elapsed_ms = u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX);
            debug!(status = parts.status.as_u16(), elapsed_ms, "request completed");
            Ok(Response::from_parts(parts, body))
        }
        .instrument(span)
        .await
    }

    /// Returns the names of the stages in `phase`, in execution order.
    #[must_use]
    pub fn stage_names(&self, phase: Phase) -> Vec<&str> {
        self.stages(phase).iter().map(|stage| stage.name()).collect()
    }

    /// Returns the total number of stages across both phases.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.on_request.len() + self.on_before_response.len()
    }

    fn stages(&self, phase: Phase) -> &[BoxedStage] {
        match phase {
            Phase::OnRequest => &self.on_request,
            Phase::OnBeforeResponse => &self.on_before_response,
        }
    }

    async fn run_stages(
        &self,
        phase: Phase,
        ctx: &mut RequestContext,
    ) -> Result<Option<Response>, PipelineError> {
        for stage in self.stages(phase) {
            let name = stage.name();
            debug!(stage = name, phase = %phase, "stage started");

            let started = Instant::now();
            let result = AssertUnwindSafe(async { stage.call(ctx).await })
                .catch_unwind()
                .await;
            histogram!(
                names::STAGE_DURATION_SECONDS,
                "stage" => name.to_string(),
                "phase" => phase.name(),
            )
            .record(started.elapsed().as_secs_f64());

            let outcome = match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(cause)) => {
                    warn!(stage = name, phase = %phase, error = %cause, "stage failed");
                    record_failure(name, phase);
                    return Err(PipelineError::failure(name, phase, cause));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(stage = name, phase = %phase, panic = %message, "stage panicked");
                    record_failure(name, phase);
                    return Err(PipelineError::failure(
                        name,
                        phase,
                        anyhow::anyhow!("stage panicked: {message}"),
                    ));
                }
            };

            match outcome {
                StageOutcome::Continue => {
                    debug!(stage = name, phase = %phase, "stage completed");
                }
                StageOutcome::Respond(response) => {
                    debug!(
                        stage = name,
                        phase = %phase,
                        status = response.status().as_u16(),
                        "stage short-circuited pipeline"
                    );
                    counter!(
                        names::SHORT_CIRCUITS_TOTAL,
                        "stage" => name.to_string(),
                        "phase" => phase.name(),
                    )
                    .increment(1);
                    return Ok(Some(response));
                }
                StageOutcome::Malformed(reason) => {
                    warn!(
                        stage = name,
                        phase = %phase,
                        reason = %reason,
                        "stage returned invalid terminal response"
                    );
                    record_failure(name, phase);
                    return Err(PipelineError::invalid_return(name, phase, reason));
                }
            }
        }

        Ok(None)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("on_request", &self.stage_names(Phase::OnRequest))
            .field("on_before_response", &self.stage_names(Phase::OnBeforeResponse))
            .finish()
    }
}

/// Overlays `incoming` onto `target`: every header name present in
/// `incoming` replaces all of its values in `target`.
fn merge_headers(target: &mut HeaderMap, incoming: &HeaderMap) {
    for name in incoming.keys() {
        target.remove(name);
        for value in incoming.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

fn record_failure(stage: &str, phase: Phase) {
    counter!(
        names::STAGE_FAILURES_TOTAL,
        "stage" => stage.to_string(),
        "phase" => phase.name(),
    )
    .increment(1);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// Stages are kept in the order they are added. [`PipelineBuilder::stage`]
/// files a stage under the phase it declares; [`PipelineBuilder::on_request`]
/// and [`PipelineBuilder::on_before_response`] additionally check that the
/// declared phase matches, reporting a mismatch from [`PipelineBuilder::build`].
#[derive(Default)]
pub struct PipelineBuilder {
    on_request: Vec<BoxedStage>,
    on_before_response: Vec<BoxedStage>,
    errors: Vec<PipelineError>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage to the list for the phase it declares.
    #[must_use]
    pub fn stage<S: Stage>(self, stage: S) -> Self {
        self.boxed_stage(Arc::new(stage))
    }

    /// Appends an already-shared stage to the list for the phase it declares.
    #[must_use]
    pub fn boxed_stage(mut self, stage: BoxedStage) -> Self {
        match stage.phase() {
            Phase::OnRequest => self.on_request.push(stage),
            Phase::OnBeforeResponse => self.on_before_response.push(stage),
        }
        self
    }

    /// Appends an `on_request` stage.
    #[must_use]
    pub fn on_request<S: Stage>(self, stage: S) -> Self {
        self.checked(Phase::OnRequest, stage)
    }

    /// Appends an `on_before_response` stage.
    #[must_use]
    pub fn on_before_response<S: Stage>(self, stage: S) -> Self {
        self.checked(Phase::OnBeforeResponse, stage)
    }

    /// Builds the pipeline.
    ///
    /// Fails with [`PipelineError::PhaseMismatch`] if a stage was registered
    /// under a phase it does not declare.
    pub fn build(mut self) -> Result<Pipeline, PipelineError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }

        Ok(Pipeline {
            on_request: self.on_request,
            on_before_response: self.on_before_response,
        })
    }

    fn checked<S: Stage>(mut self, registered: Phase, stage: S) -> Self {
        let declared = stage.phase();
        if declared != registered {
            self.errors.push(PipelineError::PhaseMismatch {
                stage: stage.name().to_string(),
                declared,
                registered,
            });
            return self;
        }
        self.stage(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FnStage;
    use bytes::Bytes;
    use http::{HeaderValue, StatusCode};
    use http_body_util::Full;
    use std::sync::Mutex;

    fn context() -> RequestContext {
        RequestContext::new(
            http::Request::builder()
                .uri("/test")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
    }

    fn recorder(
        name: &'static str,
        phase: Phase,
        order: Arc<Mutex<Vec<&'static str>>>,
    ) -> FnStage {
        FnStage::sync(name, phase, move |_ctx| {
            order.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_run_executes_in_declaration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .stage(recorder("first", Phase::OnRequest, order.clone()))
            .stage(recorder("late", Phase::OnBeforeResponse, order.clone()))
            .stage(recorder("second", Phase::OnRequest, order.clone()))
            .stage(recorder("third", Phase::OnRequest, order.clone()))
            .build()
            .unwrap();

        let mut ctx = context();
        let outcome = pipeline.run(Phase::OnRequest, &mut ctx).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_run_stops_at_terminal_response() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let pipeline = Pipeline::builder()
            .stage(recorder("a", Phase::OnRequest, order.clone()))
            .stage(FnStage::sync("deny", Phase::OnRequest, |_ctx| {
                http::Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body(Full::new(Bytes::new()))
                    .map_err(anyhow::Error::from)
            }))
            .stage(recorder("b", Phase::OnRequest, order.clone()))
            .build()
            .unwrap();

        let mut ctx = context();
        let response = pipeline
            .run(Phase::OnRequest, &mut ctx)
            .await
            .unwrap()
            .expect("terminal response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(*order.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failed_phase_restores_headers() {
        let pipeline = Pipeline::builder()
            .stage(FnStage::sync("writer", Phase::OnBeforeResponse, |ctx| {
                ctx.response_headers_mut()
                    .insert("x-partial", HeaderValue::from_static("1"));
                Ok(())
            }))
            .stage(FnStage::sync("broken", Phase::OnBeforeResponse, |_ctx| {
                Err::<(), _>(anyhow::anyhow!("nope"))
            }))
            .build()
            .unwrap();

        let mut ctx = context();
        ctx.response_headers_mut()
            .insert("x-existing", HeaderValue::from_static("kept"));

        let err = pipeline
            .run(Phase::OnBeforeResponse, &mut ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MiddlewareFailure { .. }));
        assert_eq!(err.stage(), Some("broken"));
        assert!(ctx.response_headers().get("x-partial").is_none());
        assert_eq!(ctx.response_headers()["x-existing"], "kept");
    }

    #[tokio::test]
    async fn test_panicking_stage_is_reported() {
        let pipeline = Pipeline::builder()
            .stage(FnStage::sync("explodes", Phase::OnRequest, |_ctx| -> anyhow::Result<()> {
                panic!("kaboom")
            }))
            .build()
            .unwrap();

        let mut ctx = context();
        let err = pipeline.run(Phase::OnRequest, &mut ctx).await.unwrap_err();

        match err {
            PipelineError::MiddlewareFailure { stage, phase, cause } => {
                assert_eq!(stage, "explodes");
                assert_eq!(phase, Phase::OnRequest);
                assert!(cause.to_string().contains("kaboom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_return_is_rejected() {
        let pipeline = Pipeline::builder()
            .stage(FnStage::sync("early-hints", Phase::OnRequest, |_ctx| {
                http::Response::builder()
                    .status(StatusCode::EARLY_HINTS)
                    .body(Full::new(Bytes::new()))
                    .map_err(anyhow::Error::from)
            }))
            .build()
            .unwrap();

        let mut ctx = context();
        let err = pipeline.run(Phase::OnRequest, &mut ctx).await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::InvalidMiddlewareReturn {
                phase: Phase::OnRequest,
                ..
            }
        ));
    }

    #[test]
    fn test_merge_headers_replaces_per_name() {
        let mut target = HeaderMap::new();
        target.insert("x-a", HeaderValue::from_static("old"));
        target.insert("x-b", HeaderValue::from_static("untouched"));

        let mut incoming = HeaderMap::new();
        incoming.append("x-a", HeaderValue::from_static("new-1"));
        incoming.append("x-a", HeaderValue::from_static("new-2"));

        merge_headers(&mut target, &incoming);

        let values: Vec<_> = target.get_all("x-a").iter().collect();
        assert_eq!(values, vec!["new-1", "new-2"]);
        assert_eq!(target["x-b"], "untouched");
    }

    #[test]
    fn test_phase_mismatch_fails_build() {
        let result = Pipeline::builder()
            .on_request(FnStage::sync("late", Phase::OnBeforeResponse, |_ctx| Ok(())))
            .build();

        match result {
            Err(PipelineError::PhaseMismatch {
                stage,
                declared,
                registered,
            }) => {
                assert_eq!(stage, "late");
                assert_eq!(declared, Phase::OnBeforeResponse);
                assert_eq!(registered, Phase::OnRequest);
            }
            other => panic!("expected phase mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_stage_names_and_count() {
        let pipeline = Pipeline::builder()
            .on_request(FnStage::sync("a", Phase::OnRequest, |_ctx| Ok(())))
            .on_before_response(FnStage::sync("b", Phase::OnBeforeResponse, |_ctx| Ok(())))
            .build()
            .unwrap();

        assert_eq!(pipeline.stage_names(Phase::OnRequest), vec!["a"]);
        assert_eq!(pipeline.stage_names(Phase::OnBeforeResponse), vec!["b"]);
        assert_eq!(pipeline.stage_count(), 2);
    }

    #[test]
    fn test_empty_pipeline() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert_eq!(pipeline.stage_count(), 0);
    }
}

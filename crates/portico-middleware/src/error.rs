//! Pipeline error types.

use http::StatusCode;
use portico_core::{Phase, Response, ResponseExt};
use thiserror::Error;

/// Errors surfaced by [`Pipeline`](crate::Pipeline).
///
/// The pipeline never recovers locally: every variant propagates to the
/// caller of [`Pipeline::run`](crate::Pipeline::run) or
/// [`Pipeline::process`](crate::Pipeline::process), which decides whether to
/// turn it into a generic failure response via [`PipelineError::to_response`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage raised (returned `Err` or panicked) while running.
    #[error("middleware stage `{stage}` failed during {phase}: {cause}")]
    MiddlewareFailure {
        /// Name of the failing stage.
        stage: String,
        /// Phase the stage was running in.
        phase: Phase,
        /// What the stage raised.
        #[source]
        cause: anyhow::Error,
    },

    /// A stage tried to stop the pipeline with something that is not a
    /// well-formed terminal response.
    #[error("middleware stage `{stage}` returned an invalid terminal response during {phase}: {reason}")]
    InvalidMiddlewareReturn {
        /// Name of the offending stage.
        stage: String,
        /// Phase the stage was running in.
        phase: Phase,
        /// Why the return value was rejected.
        reason: String,
    },

    /// The route handler failed.
    #[error("route handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// A stage was registered under a phase it does not declare.
    #[error("stage `{stage}` declares phase {declared} but was registered for {registered}")]
    PhaseMismatch {
        /// Name of the stage.
        stage: String,
        /// The phase the stage declares.
        declared: Phase,
        /// The phase it was registered under.
        registered: Phase,
    },
}

impl PipelineError {
    /// Creates a middleware failure error.
    pub fn failure(stage: impl Into<String>, phase: Phase, cause: anyhow::Error) -> Self {
        Self::MiddlewareFailure {
            stage: stage.into(),
            phase,
            cause,
        }
    }

    /// Creates an invalid return error.
    pub fn invalid_return(
        stage: impl Into<String>,
        phase: Phase,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMiddlewareReturn {
            stage: stage.into(),
            phase,
            reason: reason.into(),
        }
    }

    /// Returns the stage name, if the error came from a stage.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::MiddlewareFailure { stage, .. }
            | Self::InvalidMiddlewareReturn { stage, .. }
            | Self::PhaseMismatch { stage, .. } => Some(stage),
            Self::Handler(_) => None,
        }
    }

    /// Returns the phase the error occurred in, if it came from a running stage.
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::MiddlewareFailure { phase, .. } | Self::InvalidMiddlewareReturn { phase, .. } => {
                Some(*phase)
            }
            Self::Handler(_) | Self::PhaseMismatch { .. } => None,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MiddlewareFailure { .. } => "MIDDLEWARE_FAILURE",
            Self::InvalidMiddlewareReturn { .. } => "INVALID_MIDDLEWARE_RETURN",
            Self::Handler(_) => "HANDLER_FAILURE",
            Self::PhaseMismatch { .. } => "PHASE_MISMATCH",
        }
    }

    /// Builds a generic `500 Internal Server Error` response for this error.
    ///
    /// The message does not include the underlying cause, which may carry
    /// internal details.
    #[must_use]
    pub fn to_response(&self) -> Response {
        Response::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            self.code(),
            "the request could not be processed",
        )
    }
}

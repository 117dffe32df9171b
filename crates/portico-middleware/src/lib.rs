//! # Portico Middleware
//!
//! Ordered interception pipeline for the request lifecycle.
//!
//! Every request flows through two phases of user-declared stages with the
//! route handler in between:
//!
//! ```text
//! Request → on_request[0] → on_request[1] → … → Handler
//!                                                  ↓
//! Response ← … ← on_before_response[1] ← on_before_response[0]
//! ```
//!
//! ## Guarantees
//!
//! - **Declaration order**: stages run in the order they were added, per phase
//! - **Sequential**: a stage finishes (including any async work) before the next starts
//! - **Short-circuit**: a stage returning a terminal response ends the phase;
//!   during `on_request` the handler and the whole `on_before_response` phase
//!   are skipped as well
//! - **Header precedence**: headers written in `on_before_response` win over the
//!   handler's, which win over those written in `on_request`
//! - **No swallowing**: stage failures always propagate as [`PipelineError`]
//!
//! ## Example
//!
//! ```
//! use portico_core::Phase;
//! use portico_middleware::{FnStage, Pipeline, StageOutcome};
//!
//! let pipeline = Pipeline::builder()
//!     .stage(FnStage::sync("auth", Phase::OnRequest, |ctx| {
//!         ctx.locals_mut().insert("user", "alice".to_string());
//!         Ok(StageOutcome::Continue)
//!     }))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(pipeline.stage_names(Phase::OnRequest), vec!["auth"]);
//! ```

#![doc(html_root_url = "https://docs.rs/portico-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod pipeline;
pub mod stage;
pub mod stages;

pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use portico_core::{Phase, Request, RequestContext, Response};
pub use stage::{BoxFuture, FnStage, Stage, StageOutcome, StageResult};

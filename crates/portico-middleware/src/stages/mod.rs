//! Built-in stages.
//!
//! These are ordinary [`Stage`](crate::Stage) implementations; the pipeline
//! gives them no special treatment. Register them like any other stage, in
//! the position you want them to run.
//!
//! - [`request_id`]: assigns or propagates the request ID (`on_request`)
//! - [`server_timing`]: reports total processing time (`on_before_response`)

pub mod request_id;
pub mod server_timing;

pub use request_id::{RequestIdStage, REQUEST_ID_HEADER, REQUEST_ID_LOCAL};
pub use server_timing::{ServerTimingStage, SERVER_TIMING_HEADER};

//! # Portico Core
//!
//! Core request types shared by the Portico interception pipeline and the
//! query cache.
//!
//! - [`RequestContext`] - Immutable request facts plus per-request mutable state
//! - [`Locals`] - Request-scoped, freely-typed key/value storage
//! - [`RequestId`] - UUID v7 request identifier
//! - [`Phase`] - The two lifecycle points a stage can bind to
//! - [`Request`] / [`Response`] - HTTP types used at the pipeline boundary

#![doc(html_root_url = "https://docs.rs/portico-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod locals;
mod phase;
pub mod types;

pub use context::{RequestContext, RequestId};
pub use locals::Locals;
pub use phase::Phase;
pub use types::{Request, Response, ResponseExt};

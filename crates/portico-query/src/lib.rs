//! # Portico Query
//!
//! A deduplicating, versioned cache for server-function queries.
//!
//! A query is an asynchronous operation identified by a [`QueryKey`]. The
//! [`QueryCache`] makes sure that:
//!
//! - concurrent invocations of a pending key share one execution
//! - settled results are served from the cache until invalidated (or until
//!   they pass the configured stale time)
//! - invalidation bumps the entry's version and, when someone is watching,
//!   refetches right away
//! - completions that belong to an outdated version never overwrite newer
//!   state
//!
//! Reactive consumers read an entry through a [`ReadableSlot`], a live
//! `{pending, value, error}` view that is notified on every transition.
//!
//! ## Entry lifecycle
//!
//! ```text
//!            invoke                 settle(v)
//!   Idle ───────────────▶ Pending ─────────────▶ Resolved / Rejected
//!                            ▲                        │
//!                            │   invalidate (v+1)     │
//!                            └────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use portico_query::{CacheConfig, QueryCache, QueryKey, RetentionPolicy};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache: QueryCache<String> = QueryCache::with_config(
//!     CacheConfig::new().with_retention(RetentionPolicy::GracePeriod(Duration::from_secs(60))),
//! );
//!
//! let key = QueryKey::with_args("post", &1).unwrap();
//! let mut slot = cache.subscribe(&key);
//!
//! let title = cache
//!     .invoke(&key, || async { Ok("Hello, world".to_string()) })
//!     .await
//!     .unwrap();
//! assert_eq!(title, "Hello, world");
//! assert_eq!(slot.settled().await.value.as_deref(), Some("Hello, world"));
//!
//! // Someone edited the post: refetch for everyone watching it.
//! cache.invalidate(&key);
//! assert!(slot.pending());
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/portico-query/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod handle;
pub mod key;
pub mod slot;
pub mod stats;

pub use cache::QueryCache;
pub use config::{CacheConfig, RetentionPolicy};
pub use entry::{QueryEntry, QuerySnapshot, QueryState};
pub use error::QueryError;
pub use handle::QueryHandle;
pub use key::QueryKey;
pub use slot::ReadableSlot;
pub use stats::CacheStats;

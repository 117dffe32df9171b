//! Query error types.

use crate::key::QueryKey;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by the query cache.
///
/// `QueryError` is cheap to clone: one settlement is delivered to every
/// handle and slot of a cycle, so the underlying cause is shared.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The operation backing a query failed or panicked.
    #[error("query `{key}` failed: {cause}")]
    Execution {
        /// The key whose operation failed.
        key: QueryKey,
        /// What the operation returned or how it panicked.
        cause: Arc<anyhow::Error>,
    },

    /// The operation's task was cancelled before it produced a result,
    /// e.g. because the runtime shut down.
    #[error("query `{key}` was cancelled before it settled")]
    Cancelled {
        /// The key whose operation was cancelled.
        key: QueryKey,
    },

    /// The query was invoked outside of a Tokio runtime, so its operation
    /// could not be executed.
    #[error("query `{key}` was not executed: no tokio runtime is available")]
    NoRuntime {
        /// The key that was invoked.
        key: QueryKey,
    },

    /// Query arguments could not be canonicalized into a key.
    #[error("failed to encode arguments for query `{id}`: {message}")]
    KeyEncoding {
        /// Operation id.
        id: String,
        /// Serializer error.
        message: String,
    },
}

impl QueryError {
    /// Creates an execution error.
    pub fn execution(key: QueryKey, cause: anyhow::Error) -> Self {
        Self::Execution {
            key,
            cause: Arc::new(cause),
        }
    }

    /// Returns the key this error belongs to, if any.
    #[must_use]
    pub const fn key(&self) -> Option<&QueryKey> {
        match self {
            Self::Execution { key, .. } | Self::Cancelled { key } | Self::NoRuntime { key } => {
                Some(key)
            }
            Self::KeyEncoding { .. } => None,
        }
    }

    /// Returns the operation's error, for execution failures.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Execution { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

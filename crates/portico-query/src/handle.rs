//! Handles returned by [`QueryCache::invoke`](crate::QueryCache::invoke).

use crate::entry::{QueryEntry, QuerySnapshot, SharedResult};
use crate::error::QueryError;
use crate::key::QueryKey;
use std::future::IntoFuture;
use std::sync::Arc;

/// Tracks one execution cycle of a query.
///
/// Every handle returned while a cycle is pending shares that cycle's single
/// execution; they all settle to the same value or error. A handle keeps
/// reporting its own cycle's outcome even if the entry has since moved on to
/// a newer version. Use [`QueryHandle::snapshot`] to read the entry's
/// latest state instead.
///
/// Handles can be awaited directly:
///
/// ```
/// use portico_query::QueryCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: QueryCache<u32> = QueryCache::new();
/// let value = cache.invoke("answer", || async { Ok(42) }).await.unwrap();
/// assert_eq!(value, 42);
/// # }
/// ```
pub struct QueryHandle<T> {
    entry: Arc<QueryEntry<T>>,
    version: u64,
    result: SharedResult<T>,
}

impl<T: Clone> QueryHandle<T> {
    pub(crate) fn new(entry: Arc<QueryEntry<T>>, version: u64, result: SharedResult<T>) -> Self {
        Self {
            entry,
            version,
            result,
        }
    }

    /// Returns the query key.
    #[must_use]
    pub fn key(&self) -> &QueryKey {
        self.entry.key()
    }

    /// Returns the version of the cycle this handle tracks.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Reads the entry's current slot without waiting.
    #[must_use]
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        self.entry.snapshot()
    }

    /// Returns the cycle's result, if some clone of this handle has already
    /// been awaited to completion.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, QueryError>> {
        self.result.peek().cloned()
    }

    /// Waits for the cycle to settle.
    ///
    /// # Errors
    ///
    /// Returns the cycle's [`QueryError`] if the operation failed.
    pub async fn resolve(&self) -> Result<T, QueryError> {
        self.result.clone().await
    }
}

impl<T> Clone for QueryHandle<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            version: self.version,
            result: self.result.clone(),
        }
    }
}

impl<T: Clone> IntoFuture for QueryHandle<T> {
    type Output = Result<T, QueryError>;
    type IntoFuture = SharedResult<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.result
    }
}

impl<T> std::fmt::Debug for QueryHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("key", self.entry.key())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

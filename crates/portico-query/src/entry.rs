//! Cache entries and their observable state.

use crate::error::QueryError;
use crate::key::QueryKey;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Factory that starts one execution of a query's operation.
pub(crate) type Operation<T> = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

/// The result of one execution cycle, shared by every handle of that cycle.
pub(crate) type SharedResult<T> = Shared<BoxFuture<'static, Result<T, QueryError>>>;

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// No execution has run yet (the entry was created by a subscriber).
    Idle,
    /// An execution cycle is in flight.
    Pending,
    /// The latest cycle produced a value.
    Resolved,
    /// The latest cycle produced an error.
    Rejected,
}

/// A consistent read of an entry's `{pending, value, error}` slot.
///
/// `value` and `error` are never both present. While a new cycle is pending
/// the outcome of the previous cycle stays visible; settlement replaces it.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
    /// Whether an execution cycle is in flight.
    pub pending: bool,
    /// The latest settled value.
    pub value: Option<T>,
    /// The latest settled error.
    pub error: Option<QueryError>,
    /// The entry version this snapshot was taken at.
    pub version: u64,
}

impl<T> QuerySnapshot<T> {
    pub(crate) const fn empty() -> Self {
        Self {
            pending: false,
            value: None,
            error: None,
            version: 0,
        }
    }

    /// Returns the lifecycle state this snapshot represents.
    #[must_use]
    pub const fn state(&self) -> QueryState {
        if self.pending {
            QueryState::Pending
        } else if self.error.is_some() {
            QueryState::Rejected
        } else if self.value.is_some() {
            QueryState::Resolved
        } else {
            QueryState::Idle
        }
    }

    /// Returns `true` if the latest cycle has settled (resolved or rejected).
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.value.is_some() || self.error.is_some()
    }
}

/// Mutable entry state, guarded by the entry mutex.
pub(crate) struct EntryState<T> {
    /// Bumped on every invalidation, refetch and `set`.
    pub(crate) version: u64,
    /// Set by invalidation; cleared when a new cycle starts.
    pub(crate) stale: bool,
    pub(crate) subscribers: usize,
    /// Factory of the most recently started cycle.
    pub(crate) operation: Option<Operation<T>>,
    /// In-flight cycle and the version it was started at.
    pub(crate) inflight: Option<(u64, SharedResult<T>)>,
    /// The in-flight cycle was started by invalidation rather than by a
    /// caller, so the next `invoke` replaces it instead of joining it.
    pub(crate) auto_refetch: bool,
    pub(crate) settled_at: Option<Instant>,
    pub(crate) evicted: bool,
    /// Bumped whenever the subscriber count changes or a cycle starts, to
    /// cancel pending grace-period evictions.
    pub(crate) eviction_epoch: u64,
}

/// One cache entry.
///
/// Entries are shared between the cache, handles and slots. All state
/// transitions happen under the entry's own mutex; the slot channel is
/// updated while that mutex is held, so readers never observe a torn state.
pub struct QueryEntry<T> {
    key: QueryKey,
    pub(crate) state: Mutex<EntryState<T>>,
    pub(crate) slot: watch::Sender<QuerySnapshot<T>>,
}

impl<T> QueryEntry<T> {
    pub(crate) fn new(key: QueryKey) -> Self {
        let (slot, _) = watch::channel(QuerySnapshot::empty());
        Self {
            key,
            state: Mutex::new(EntryState {
                version: 0,
                stale: false,
                subscribers: 0,
                operation: None,
                inflight: None,
                auto_refetch: false,
                settled_at: None,
                evicted: false,
                eviction_epoch: 0,
            }),
            slot,
        }
    }

    /// Returns the entry's key.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Returns the current version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers
    }

    /// Returns `true` if the entry was invalidated and has not refetched yet.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state.lock().stale
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.slot.borrow().state()
    }
}

impl<T: Clone> QueryEntry<T> {
    /// Returns the current slot contents.
    #[must_use]
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        self.slot.borrow().clone()
    }
}

impl<T> std::fmt::Debug for QueryEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("QueryEntry")
            .field("key", &self.key)
            .field("version", &state.version)
            .field("stale", &state.stale)
            .field("subscribers", &state.subscribers)
            .field("inflight", &state.inflight.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_is_idle() {
        let entry: QueryEntry<u32> = QueryEntry::new(QueryKey::new("posts"));
        assert_eq!(entry.state(), QueryState::Idle);
        assert_eq!(entry.version(), 0);
        assert_eq!(entry.subscriber_count(), 0);
        assert!(!entry.is_stale());
        assert!(!entry.snapshot().is_settled());
    }

    #[test]
    fn test_snapshot_state() {
        let mut snapshot = QuerySnapshot::<u32>::empty();
        snapshot.value = Some(1);
        assert_eq!(snapshot.state(), QueryState::Resolved);

        snapshot.pending = true;
        assert_eq!(snapshot.state(), QueryState::Pending);

        snapshot.pending = false;
        snapshot.value = None;
        snapshot.error = Some(QueryError::execution(
            QueryKey::new("posts"),
            anyhow::anyhow!("boom"),
        ));
        assert_eq!(snapshot.state(), QueryState::Rejected);
    }
}

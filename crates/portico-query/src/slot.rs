//! Reactive read access to an entry.

use crate::cache::CacheInner;
use crate::entry::{QueryEntry, QuerySnapshot, QueryState};
use crate::error::QueryError;
use crate::key::QueryKey;
use std::sync::Arc;
use tokio::sync::watch;

/// A live `{pending, value, error}` view of one cache entry.
///
/// A slot counts as a subscriber for as long as it exists: invalidating a
/// subscribed key starts a new execution cycle right away, and the entry is
/// not evicted while any slot is alive. Dropping the slot (or calling
/// [`ReadableSlot::unsubscribe`]) releases the subscription.
///
/// The slot always reflects the entry's latest settled cycle: an error never
/// appears next to an older value, and a newer settlement replaces both.
///
/// # Example
///
/// ```
/// use portico_query::QueryCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: QueryCache<String> = QueryCache::new();
/// let mut slot = cache.subscribe("greeting");
///
/// let _ = cache.invoke("greeting", || async { Ok("hello".to_string()) });
/// let snapshot = slot.settled().await;
///
/// assert!(!snapshot.pending);
/// assert_eq!(snapshot.value.as_deref(), Some("hello"));
/// # }
/// ```
pub struct ReadableSlot<T: Clone + Send + Sync + 'static> {
    cache: Arc<CacheInner<T>>,
    entry: Arc<QueryEntry<T>>,
    rx: watch::Receiver<QuerySnapshot<T>>,
}

impl<T: Clone + Send + Sync + 'static> ReadableSlot<T> {
    pub(crate) fn new(cache: Arc<CacheInner<T>>, entry: Arc<QueryEntry<T>>) -> Self {
        let rx = entry.slot.subscribe();
        Self { cache, entry, rx }
    }

    /// Returns the query key.
    #[must_use]
    pub fn key(&self) -> &QueryKey {
        self.entry.key()
    }

    /// Returns a consistent copy of the slot.
    #[must_use]
    pub fn snapshot(&self) -> QuerySnapshot<T> {
        self.rx.borrow().clone()
    }

    /// Returns `true` while an execution cycle is in flight.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.rx.borrow().pending
    }

    /// Returns the latest settled value, if the latest cycle resolved.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.rx.borrow().value.clone()
    }

    /// Returns the latest settled error, if the latest cycle rejected.
    #[must_use]
    pub fn error(&self) -> Option<QueryError> {
        self.rx.borrow().error.clone()
    }

    /// Returns the entry version the slot currently reflects.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> QueryState {
        self.rx.borrow().state()
    }

    /// Waits until the slot changes after the last call to `changed`.
    pub async fn changed(&mut self) {
        // The sender lives in the entry, which this slot keeps alive.
        let _ = self.rx.changed().await;
    }

    /// Waits until no cycle is pending and returns the settled snapshot.
    pub async fn settled(&mut self) -> QuerySnapshot<T> {
        if let Ok(snapshot) = self.rx.wait_for(|snapshot| !snapshot.pending).await {
            return snapshot.clone();
        }
        self.snapshot()
    }

    /// Releases the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for ReadableSlot<T> {
    fn drop(&mut self) {
        self.cache.release(&self.entry);
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for ReadableSlot<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadableSlot")
            .field("key", self.entry.key())
            .field("snapshot", &*self.rx.borrow())
            .finish()
    }
}

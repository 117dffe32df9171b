//! The query cache.
//!
//! # Concurrency
//!
//! Entries live in a `DashMap`; each entry carries its own mutex. Every state
//! transition (starting a cycle, settling, invalidating, subscribing,
//! evicting) happens under that mutex, which makes the pending check and the
//! start of an execution atomic with respect to concurrent `invoke` calls.
//!
//! Lock order is always *entry, then map shard*. Map guards are never held
//! while an entry is locked by the same code path, except during eviction,
//! which removes the entry from the map while holding its mutex. An `invoke`
//! that races with eviction sees the entry marked evicted and retries
//! against a fresh entry.

use crate::config::{CacheConfig, RetentionPolicy};
use crate::entry::{EntryState, Operation, QueryEntry, QuerySnapshot, SharedResult};
use crate::error::QueryError;
use crate::handle::QueryHandle;
use crate::key::QueryKey;
use crate::slot::ReadableSlot;
use crate::stats::{CacheStats, StatsCounters};
use dashmap::DashMap;
use futures_util::future::{self, FutureExt};
use metrics::counter;
use portico_telemetry::metrics::names;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Deduplicating, versioned cache of asynchronous query results.
///
/// One cache holds results of a single value type `T`. Cloning the cache is
/// cheap; clones share the same entries.
///
/// All methods that may start an execution must be called from within a
/// Tokio runtime.
///
/// # Example
///
/// ```
/// use portico_query::QueryCache;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache: QueryCache<Vec<String>> = QueryCache::new();
/// let calls = Arc::new(AtomicUsize::new(0));
///
/// let fetch_posts = {
///     let calls = calls.clone();
///     move || {
///         calls.fetch_add(1, Ordering::SeqCst);
///         async { Ok(vec!["hello world".to_string()]) }
///     }
/// };
///
/// let first = cache.invoke("posts", fetch_posts.clone());
/// let second = cache.invoke("posts", fetch_posts);
///
/// assert_eq!(first.resolve().await.unwrap(), second.resolve().await.unwrap());
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// # }
/// ```
pub struct QueryCache<T> {
    inner: Arc<CacheInner<T>>,
}

pub(crate) struct CacheInner<T> {
    entries: DashMap<QueryKey, Arc<QueryEntry<T>>>,
    config: CacheConfig,
    stats: StatsCounters,
}

impl<T: Clone + Send + Sync + 'static> QueryCache<T> {
    /// Creates a cache with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                config,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// Returns the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Invokes the query identified by `key`.
    ///
    /// - pending and not invalidated: joins the in-flight execution, unless
    ///   that execution was started by `invalidate`, in which case it is
    ///   superseded by a new cycle running `operation`
    /// - settled, fresh and not invalidated: returns a handle that is already
    ///   settled with the cached value or error
    /// - otherwise: starts a new execution cycle with `operation`
    ///
    /// `operation` is remembered as the key's factory and re-run when the key
    /// is invalidated while it has subscribers. It is called synchronously
    /// with the entry locked, so it must not touch this cache before
    /// returning its future; the future itself may.
    ///
    /// Executions run on the ambient Tokio runtime. Called outside of one,
    /// the operation is not run and the handle settles with
    /// [`QueryError::NoRuntime`].
    pub fn invoke<K, F, Fut>(&self, key: K, operation: F) -> QueryHandle<T>
    where
        K: Into<QueryKey>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let operation: Operation<T> = Arc::new(move || operation().boxed());
        self.inner.invoke(&key.into(), &operation)
    }

    /// Invalidates one key.
    ///
    /// Bumps the entry's version and marks it stale. With active subscribers
    /// a new execution cycle starts immediately; otherwise the entry is
    /// refreshed by the next `invoke`. Returns `false` if the key is unknown.
    pub fn invalidate(&self, key: impl Into<QueryKey>) -> bool {
        let key = key.into();
        self.inner
            .lookup(&key)
            .is_some_and(|entry| self.inner.invalidate_entry(&entry))
    }

    /// Invalidates every key matching `predicate` and returns how many were
    /// invalidated.
    pub fn invalidate_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let matching: Vec<_> = self
            .inner
            .entries
            .iter()
            .filter(|item| predicate(item.key()))
            .map(|item| Arc::clone(item.value()))
            .collect();

        matching
            .iter()
            .filter(|entry| self.inner.invalidate_entry(entry))
            .count()
    }

    /// Invalidates every entry.
    pub fn invalidate_all(&self) -> usize {
        self.invalidate_matching(|_| true)
    }

    /// Subscribes to a key, creating an idle entry if the key is unknown.
    pub fn subscribe(&self, key: impl Into<QueryKey>) -> ReadableSlot<T> {
        self.inner.subscribe(&key.into())
    }

    /// Stores `value` as the key's resolved result and returns the new version.
    ///
    /// Any in-flight execution for the key becomes stale and its result is
    /// discarded.
    pub fn set(&self, key: impl Into<QueryKey>, value: T) -> u64 {
        self.inner.set(&key.into(), value)
    }

    /// Removes a key immediately, regardless of subscribers or retention.
    ///
    /// Existing slots stop receiving updates. Returns `false` if the key was
    /// unknown.
    pub fn remove(&self, key: impl Into<QueryKey>) -> bool {
        let key = key.into();
        let Some((_, entry)) = self.inner.entries.remove(&key) else {
            return false;
        };

        let mut state = entry.state.lock();
        state.evicted = true;
        state.inflight = None;
        entry.slot.send_modify(|slot| slot.pending = false);
        drop(state);

        debug!(query_key = %key, "query entry removed");
        true
    }

    /// Returns the key's current slot contents.
    #[must_use]
    pub fn snapshot(&self, key: impl Into<QueryKey>) -> Option<QuerySnapshot<T>> {
        self.inner.lookup(&key.into()).map(|entry| entry.snapshot())
    }

    /// Returns the entry for a key.
    #[must_use]
    pub fn entry(&self, key: impl Into<QueryKey>) -> Option<Arc<QueryEntry<T>>> {
        self.inner.lookup(&key.into())
    }

    /// Returns `true` if the key has an entry.
    #[must_use]
    pub fn contains(&self, key: impl Into<QueryKey>) -> bool {
        self.inner.entries.contains_key(&key.into())
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Returns all keys currently cached.
    #[must_use]
    pub fn keys(&self) -> Vec<QueryKey> {
        self.inner
            .entries
            .iter()
            .map(|item| item.key().clone())
            .collect()
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.inner.entries.len())
    }
}

impl<T: Clone + Send + Sync + 'static> Default for QueryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.inner.entries.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> CacheInner<T> {
    fn lookup(&self, key: &QueryKey) -> Option<Arc<QueryEntry<T>>> {
        self.entries.get(key).map(|item| Arc::clone(item.value()))
    }

    fn entry_for(&self, key: &QueryKey) -> Arc<QueryEntry<T>> {
        Arc::clone(
            self.entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(QueryEntry::new(key.clone())))
                .value(),
        )
    }

    fn invoke(self: &Arc<Self>, key: &QueryKey, operation: &Operation<T>) -> QueryHandle<T> {
        loop {
            let entry = self.entry_for(key);
            let mut state = entry.state.lock();
            if state.evicted {
                continue;
            }

            if !state.stale {
                if !state.auto_refetch {
                    if let Some((version, inflight)) = &state.inflight {
                        StatsCounters::bump(&self.stats.dedup_joins);
                        counter!(names::QUERY_DEDUP_JOINS_TOTAL).increment(1);
                        trace!(query_key = %key, version, "joined in-flight query");
                        return QueryHandle::new(Arc::clone(&entry), *version, inflight.clone());
                    }
                }

                if state.inflight.is_some() {
                    // The refetch started by invalidation is superseded.
                    state.version += 1;
                    debug!(query_key = %key, version = state.version, "superseding refetch");
                } else if !self.is_expired(&state) {
                    if let Some(result) = settled_result(entry.snapshot()) {
                        StatsCounters::bump(&self.stats.hits);
                        counter!(names::QUERY_CACHE_HITS_TOTAL).increment(1);
                        trace!(query_key = %key, version = state.version, "query cache hit");
                        let ready = future::ready(result).boxed().shared();
                        return QueryHandle::new(Arc::clone(&entry), state.version, ready);
                    }
                } else {
                    // Expiry counts as an implicit invalidation.
                    state.version += 1;
                }
            }

            StatsCounters::bump(&self.stats.misses);
            counter!(names::QUERY_CACHE_MISSES_TOTAL).increment(1);
            return self.begin_cycle(&entry, &mut state, Arc::clone(operation));
        }
    }

    fn is_expired(&self, state: &EntryState<T>) -> bool {
        match (self.config.stale_time, state.settled_at) {
            (Some(stale_time), Some(settled_at)) => settled_at.elapsed() >= stale_time,
            _ => false,
        }
    }

    /// Starts an execution cycle at the entry's current version.
    ///
    /// The operation's future is created here, with the entry locked; it is
    /// polled on a spawned task so the cycle settles even if every handle is
    /// dropped. Without a runtime the entry is left untouched and the
    /// returned handle is already rejected.
    fn begin_cycle(
        self: &Arc<Self>,
        entry: &Arc<QueryEntry<T>>,
        state: &mut EntryState<T>,
        operation: Operation<T>,
    ) -> QueryHandle<T> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(query_key = %entry.key(), "no tokio runtime, query not executed");
            let err = QueryError::NoRuntime {
                key: entry.key().clone(),
            };
            let ready = future::ready(Err(err)).boxed().shared();
            return QueryHandle::new(Arc::clone(entry), state.version, ready);
        };

        let execution = operation();

        let version = state.version;
        state.stale = false;
        state.auto_refetch = false;
        state.operation = Some(operation);
        state.eviction_epoch += 1;
        StatsCounters::bump(&self.stats.executions);
        debug!(query_key = %entry.key(), version, "starting query execution");

        let cache = Arc::clone(self);
        let owner = Arc::clone(entry);
        let task = runtime.spawn(async move {
            let outcome = AssertUnwindSafe(execution).catch_unwind().await;
            let result = match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(cause)) => Err(QueryError::execution(owner.key().clone(), cause)),
                Err(panic) => Err(QueryError::execution(
                    owner.key().clone(),
                    anyhow::anyhow!("query operation panicked: {}", panic_message(panic.as_ref())),
                )),
            };
            cache.settle(&owner, version, &result);
            result
        });

        let key = entry.key().clone();
        let result: SharedResult<T> = async move {
            task.await
                .unwrap_or_else(|_| Err(QueryError::Cancelled { key }))
        }
        .boxed()
        .shared();

        state.inflight = Some((version, result.clone()));
        entry.slot.send_modify(|slot| {
            slot.pending = true;
            slot.version = version;
        });

        QueryHandle::new(Arc::clone(entry), version, result)
    }

    /// Records the outcome of the cycle started at `version`, unless the
    /// entry has moved on since. An entry left idle with no subscribers is
    /// handed to the retention policy.
    fn settle(
        self: &Arc<Self>,
        entry: &Arc<QueryEntry<T>>,
        version: u64,
        result: &Result<T, QueryError>,
    ) {
        let mut state = entry.state.lock();

        if state.evicted || state.version != version {
            StatsCounters::bump(&self.stats.stale_discards);
            counter!(names::QUERY_EXECUTIONS_TOTAL, "outcome" => "discarded").increment(1);
            debug!(
                query_key = %entry.key(),
                stale_version = version,
                current_version = state.version,
                "stale write discarded"
            );

            // No newer cycle was started, so nothing is pending any more.
            if state.inflight.as_ref().is_some_and(|(v, _)| *v == version) {
                state.inflight = None;
                entry.slot.send_modify(|slot| slot.pending = false);
                if state.subscribers == 0 {
                    self.apply_retention(entry, &mut state);
                }
            }
            return;
        }

        state.inflight = None;
        state.settled_at = Some(Instant::now());

        let (value, error, outcome) = match result {
            Ok(value) => (Some(value.clone()), None, "resolved"),
            Err(err) => (None, Some(err.clone()), "rejected"),
        };
        entry.slot.send_replace(QuerySnapshot {
            pending: false,
            value,
            error,
            version,
        });

        counter!(names::QUERY_EXECUTIONS_TOTAL, "outcome" => outcome).increment(1);
        debug!(query_key = %entry.key(), version, outcome, "query settled");

        if state.subscribers == 0 {
            self.apply_retention(entry, &mut state);
        }
    }

    fn invalidate_entry(self: &Arc<Self>, entry: &Arc<QueryEntry<T>>) -> bool {
        let mut state = entry.state.lock();
        if state.evicted {
            return false;
        }

        state.version += 1;
        state.stale = true;
        let version = state.version;
        debug!(
            query_key = %entry.key(),
            version,
            subscribers = state.subscribers,
            "query invalidated"
        );

        if state.subscribers > 0 {
            if let Some(operation) = state.operation.clone() {
                let _ = self.begin_cycle(entry, &mut state, operation);
                if state.inflight.is_some() {
                    state.auto_refetch = true;
                    return true;
                }
            }
        }

        entry.slot.send_modify(|slot| slot.version = version);
        true
    }

    fn subscribe(self: &Arc<Self>, key: &QueryKey) -> ReadableSlot<T> {
        loop {
            let entry = self.entry_for(key);
            let mut state = entry.state.lock();
            if state.evicted {
                continue;
            }

            state.subscribers += 1;
            state.eviction_epoch += 1;
            trace!(query_key = %key, subscribers = state.subscribers, "query subscribed");
            drop(state);

            return ReadableSlot::new(Arc::clone(self), entry);
        }
    }

    fn set(self: &Arc<Self>, key: &QueryKey, value: T) -> u64 {
        loop {
            let entry = self.entry_for(key);
            let mut state = entry.state.lock();
            if state.evicted {
                continue;
            }

            state.version += 1;
            state.stale = false;
            state.inflight = None;
            state.auto_refetch = false;
            state.settled_at = Some(Instant::now());
            let version = state.version;

            entry.slot.send_replace(QuerySnapshot {
                pending: false,
                value: Some(value),
                error: None,
                version,
            });
            debug!(query_key = %key, version, "query value set");

            if state.subscribers == 0 {
                state.eviction_epoch += 1;
                self.apply_retention(&entry, &mut state);
            }
            return version;
        }
    }

    /// Drops one subscription and applies the retention policy when the
    /// last one goes away.
    pub(crate) fn release(self: &Arc<Self>, entry: &Arc<QueryEntry<T>>) {
        let mut state = entry.state.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        state.eviction_epoch += 1;
        trace!(query_key = %entry.key(), subscribers = state.subscribers, "query unsubscribed");

        if state.subscribers > 0 || state.evicted || state.inflight.is_some() {
            return;
        }
        self.apply_retention(entry, &mut state);
    }

    /// Applies the retention policy to an entry that has just become idle:
    /// no subscribers and nothing in flight. An in-flight cycle defers this
    /// until it settles.
    fn apply_retention(self: &Arc<Self>, entry: &Arc<QueryEntry<T>>, state: &mut EntryState<T>) {
        match self.config.retention {
            RetentionPolicy::Pinned => {}
            RetentionPolicy::Immediate => self.evict_locked(entry, state),
            RetentionPolicy::GracePeriod(grace) => {
                let epoch = state.eviction_epoch;
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let cache = Arc::clone(self);
                    let entry = Arc::clone(entry);
                    runtime.spawn(async move {
                        tokio::time::sleep(grace).await;
                        cache.evict_if_idle(&entry, epoch);
                    });
                } else {
                    // No runtime to wait on.
                    self.evict_locked(entry, state);
                }
            }
        }
    }

    fn evict_if_idle(&self, entry: &Arc<QueryEntry<T>>, epoch: u64) {
        let mut state = entry.state.lock();
        if state.evicted
            || state.subscribers > 0
            || state.inflight.is_some()
            || state.eviction_epoch != epoch
        {
            return;
        }
        self.evict_locked(entry, &mut state);
    }

    /// Removes the entry from the map. Must be called with the entry locked.
    fn evict_locked(&self, entry: &Arc<QueryEntry<T>>, state: &mut EntryState<T>) {
        state.evicted = true;
        state.inflight = None;
        self.entries
            .remove_if(entry.key(), |_, current| Arc::ptr_eq(current, entry));

        StatsCounters::bump(&self.stats.evictions);
        counter!(names::QUERY_EVICTIONS_TOTAL).increment(1);
        debug!(query_key = %entry.key(), version = state.version, "query entry evicted");
    }
}

fn settled_result<T>(snapshot: QuerySnapshot<T>) -> Option<Result<T, QueryError>> {
    match (snapshot.value, snapshot.error) {
        (_, Some(err)) => Some(Err(err)),
        (Some(value), None) => Some(Ok(value)),
        (None, None) => None,
    }
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

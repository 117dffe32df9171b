//! Query cache integration tests.
//!
//! Covers deduplication, invalidation with and without subscribers, stale
//! write suppression, slot consistency and the retention policies.

use futures_util::future::{BoxFuture, FutureExt};
use portico_query::{
    CacheConfig, QueryCache, QueryError, QueryKey, QueryState, RetentionPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// An operation that counts its executions and returns `value` after `delay`.
fn slow_op(
    calls: &Arc<AtomicUsize>,
    value: &'static str,
    delay: Duration,
) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(value.to_string())
        }
        .boxed()
    }
}

/// An operation whose executions each wait for the next queued gate.
fn gated_op(
    gates: &Arc<Mutex<VecDeque<oneshot::Receiver<String>>>>,
) -> impl Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + 'static {
    let gates = Arc::clone(gates);
    move || {
        let gate = gates.lock().unwrap().pop_front();
        async move {
            match gate {
                Some(gate) => gate.await.map_err(anyhow::Error::from),
                None => Err(anyhow::anyhow!("no gate queued")),
            }
        }
        .boxed()
    }
}

fn gate(gates: &Arc<Mutex<VecDeque<oneshot::Receiver<String>>>>) -> oneshot::Sender<String> {
    let (tx, rx) = oneshot::channel();
    gates.lock().unwrap().push_back(rx);
    tx
}

#[tokio::test]
async fn test_back_to_back_invocations_share_one_execution() {
    let cache: QueryCache<String> = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch_posts = slow_op(&calls, "posts", Duration::from_millis(20));

    let first = cache.invoke("posts", fetch_posts);
    let second = cache.invoke("posts", slow_op(&calls, "other", Duration::ZERO));

    assert_eq!(first.version(), second.version());
    assert_eq!(first.resolve().await.unwrap(), "posts");
    assert_eq!(second.resolve().await.unwrap(), "posts");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().dedup_joins, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_execute_once() {
    let cache: QueryCache<String> = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        let op = slow_op(&calls, "shared", Duration::from_millis(50));
        tasks.push(tokio::spawn(async move { cache.invoke("k", op).await }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "shared");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_shared() {
    let cache: QueryCache<String> = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = {
        let calls = Arc::clone(&calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<String, _>(anyhow::anyhow!("upstream unavailable"))
            }
        }
    };

    let handles: Vec<_> = (0..8)
        .map(|_| cache.invoke("k", failing.clone()))
        .collect();

    for handle in handles {
        let err = handle.resolve().await.unwrap_err();
        assert!(err.to_string().contains("upstream unavailable"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalidate_without_subscribers_is_lazy() {
    let cache: QueryCache<String> = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = cache.invoke("posts", slow_op(&calls, "v0", Duration::ZERO));
    handle.resolve().await.unwrap();
    let version = handle.version();

    assert!(cache.invalidate("posts"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let entry = cache.entry("posts").unwrap();
    assert!(entry.is_stale());
    assert_eq!(entry.version(), version + 1);

    let refreshed = cache.invoke("posts", slow_op(&calls, "v1", Duration::ZERO));
    assert_eq!(refreshed.resolve().await.unwrap(), "v1");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!entry.is_stale());
}

#[tokio::test]
async fn test_invalidate_with_subscriber_refetches_immediately() {
    let cache: QueryCache<String> = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut slot = cache.subscribe("posts");

    cache
        .invoke("posts", slow_op(&calls, "posts", Duration::ZERO))
        .resolve()
        .await
        .unwrap();
    let before = slot.version();

    assert!(cache.invalidate("posts"));
    assert!(slot.pending());
    assert_eq!(slot.version(), before + 1);
    // The previous value stays visible while the refetch is pending.
    assert_eq!(slot.value().as_deref(), Some("posts"));

    let settled = slot.settled().await;
    assert_eq!(settled.value.as_deref(), Some("posts"));
    assert_eq!(settled.version, before + 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_matching() {
    let cache: QueryCache<String> = QueryCache::new();
    for id in ["post", "post", "user"] {
        let key = QueryKey::with_args(id, &cache.len()).unwrap();
        cache.set(key, id.to_string());
    }

    let invalidated = cache.invalidate_matching(|key| key.id() == "post");
    assert_eq!(invalidated, 2);

    let stale: Vec<_> = cache
        .keys()
        .into_iter()
        .filter(|key| cache.entry(key).unwrap().is_stale())
        .map(|key| key.id().to_string())
        .collect();
    assert_eq!(stale, vec!["post", "post"]);
}

#[tokio::test]
async fn test_stale_completion_is_discarded() {
    let cache: QueryCache<String> = QueryCache::new();
    let gates = Arc::new(Mutex::new(VecDeque::new()));
    let old_gate = gate(&gates);
    let new_gate = gate(&gates);

    let mut slot = cache.subscribe("feed");
    let old = cache.invoke("feed", gated_op(&gates));

    // Version advances while the first execution is still running.
    cache.invalidate("feed");
    assert_eq!(cache.stats().executions, 2);

    new_gate.send("new".to_string()).unwrap();
    let settled = slot.settled().await;
    assert_eq!(settled.value.as_deref(), Some("new"));
    let settled_version = settled.version;

    old_gate.send("old".to_string()).unwrap();
    // The old handle still reports its own cycle's outcome...
    assert_eq!(old.resolve().await.unwrap(), "old");

    // ...but the entry keeps the newer result.
    let snapshot = slot.snapshot();
    assert_eq!(snapshot.value.as_deref(), Some("new"));
    assert_eq!(snapshot.version, settled_version);
    assert!(!snapshot.pending);
    assert_eq!(cache.stats().stale_discards, 1);
}

#[tokio::test]
async fn test_stale_failure_does_not_clobber_value() {
    let cache: QueryCache<String> = QueryCache::new();
    let gates = Arc::new(Mutex::new(VecDeque::new()));
    let old_gate = gate(&gates);

    let old = cache.invoke("feed", gated_op(&gates));
    cache.set("feed", "seeded".to_string());

    drop(old_gate);
    assert!(old.resolve().await.is_err());

    let snapshot = cache.snapshot("feed").unwrap();
    assert_eq!(snapshot.value.as_deref(), Some("seeded"));
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_invalidated_pending_entry_without_subscribers_settles_idle() {
    let cache: QueryCache<String> = QueryCache::new();
    let gates = Arc::new(Mutex::new(VecDeque::new()));
    let first_gate = gate(&gates);

    let first = cache.invoke("feed", gated_op(&gates));
    cache.invalidate("feed");

    first_gate.send("first".to_string()).unwrap();
    assert_eq!(first.resolve().await.unwrap(), "first");

    let snapshot = cache.snapshot("feed").unwrap();
    assert!(!snapshot.pending);
    assert!(snapshot.value.is_none());

    // A stale pending entry does not capture new invocations.
    let second_gate = gate(&gates);
    let second = cache.invoke("feed", gated_op(&gates));
    second_gate.send("second".to_string()).unwrap();
    assert_eq!(second.resolve().await.unwrap(), "second");
    assert_eq!(cache.snapshot("feed").unwrap().value.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_rejected_entry_recovers_after_invalidate() {
    let cache: QueryCache<String> = QueryCache::new();
    let failures = Arc::new(AtomicUsize::new(0));
    let always_fails = {
        let failures = Arc::clone(&failures);
        move || {
            failures.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>(anyhow::anyhow!("E")) }
        }
    };

    let mut slot = cache.subscribe("post:1");
    let err = cache
        .invoke("post:1", always_fails)
        .resolve()
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Execution { .. }));

    let rejected = slot.settled().await;
    assert_eq!(rejected.state(), QueryState::Rejected);
    assert!(rejected.value.is_none());

    // Invalidation with a subscriber refetches with the stored failing factory.
    cache.invalidate("post:1");
    assert!(slot.pending());
    assert_eq!(failures.load(Ordering::SeqCst), 2);
    // While pending, the old error is still the latest settled outcome.
    assert!(slot.error().is_some());

    // An explicit retry replaces that refetch instead of joining it.
    let retry = cache.invoke("post:1", || async { Ok("new".to_string()) });
    assert_eq!(retry.resolve().await.unwrap(), "new");

    let snapshot = slot.settled().await;
    assert!(snapshot.error.is_none());
    assert!(!snapshot.pending);
    assert_eq!(snapshot.value.as_deref(), Some("new"));
    assert_eq!(snapshot.version, retry.version());
}

#[tokio::test]
async fn test_invoke_after_caller_started_cycle_still_joins() {
    let cache: QueryCache<String> = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let _slot = cache.subscribe("posts");
    let first = cache.invoke("posts", slow_op(&calls, "a", Duration::from_millis(20)));
    let second = cache.invoke("posts", slow_op(&calls, "b", Duration::ZERO));

    assert_eq!(first.version(), second.version());
    assert_eq!(second.resolve().await.unwrap(), "a");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_operation_runs_after_invalidate_without_subscribers() {
    let cache: QueryCache<String> = QueryCache::new();

    let failed = cache
        .invoke("post:1", || async { Err(anyhow::anyhow!("E")) })
        .resolve()
        .await;
    assert!(failed.is_err());

    cache.invalidate("post:1");
    let retry = cache.invoke("post:1", || async { Ok("fresh".to_string()) });
    assert_eq!(cache.entry("post:1").unwrap().state(), QueryState::Pending);
    assert_eq!(retry.resolve().await.unwrap(), "fresh");

    let snapshot = cache.snapshot("post:1").unwrap();
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.value.as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_slot_notifies_on_transitions() {
    let cache: QueryCache<u32> = QueryCache::new();
    let mut slot = cache.subscribe("n");
    assert_eq!(slot.state(), QueryState::Idle);

    let handle = cache.invoke("n", || async { Ok(1) });
    slot.changed().await;
    assert!(slot.pending() || slot.value() == Some(1));

    handle.resolve().await.unwrap();
    assert_eq!(slot.settled().await.value, Some(1));
}

#[tokio::test]
async fn test_immediate_retention_evicts_on_last_unsubscribe() {
    let cache: QueryCache<String> =
        QueryCache::with_config(CacheConfig::new().with_retention(RetentionPolicy::Immediate));
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache.subscribe("posts");
    let second = cache.subscribe("posts");
    cache
        .invoke("posts", slow_op(&calls, "posts", Duration::ZERO))
        .resolve()
        .await
        .unwrap();
    assert_eq!(cache.entry("posts").unwrap().subscriber_count(), 2);

    first.unsubscribe();
    assert!(cache.contains("posts"));

    drop(second);
    assert!(!cache.contains("posts"));
    assert_eq!(cache.stats().evictions, 1);

    // A removed entry is never resurrected.
    cache
        .invoke("posts", slow_op(&calls, "posts", Duration::ZERO))
        .resolve()
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_immediate_retention_evicts_unsubscribed_entries_on_settle() {
    let cache: QueryCache<u32> =
        QueryCache::with_config(CacheConfig::new().with_retention(RetentionPolicy::Immediate));

    for id in 0..100_u32 {
        let key = QueryKey::with_args("post", &id).unwrap();
        let value = cache.invoke(key, move || async move { Ok(id) }).resolve().await;
        assert_eq!(value.unwrap(), id);
    }

    assert!(cache.is_empty());
    assert_eq!(cache.stats().evictions, 100);
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_evicts_unsubscribed_entries_after_settle() {
    let cache: QueryCache<u32> = QueryCache::with_config(
        CacheConfig::new().with_retention(RetentionPolicy::GracePeriod(Duration::from_secs(10))),
    );

    assert_eq!(cache.invoke("n", || async { Ok(1) }).resolve().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(cache.snapshot("n").unwrap().value, Some(1));

    tokio::time::sleep(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;
    assert!(!cache.contains("n"));
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_pinned_retention_keeps_entries() {
    let cache: QueryCache<u32> =
        QueryCache::with_config(CacheConfig::new().with_retention(RetentionPolicy::Pinned));

    let slot = cache.subscribe("n");
    cache.set("n", 5);
    drop(slot);

    assert_eq!(cache.snapshot("n").unwrap().value, Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_eviction() {
    let cache: QueryCache<u32> = QueryCache::with_config(
        CacheConfig::new().with_retention(RetentionPolicy::GracePeriod(Duration::from_secs(10))),
    );

    let slot = cache.subscribe("n");
    cache.set("n", 1);
    drop(slot);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(cache.contains("n"));

    tokio::time::sleep(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;
    assert!(!cache.contains("n"));
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_cancels_grace_period_eviction() {
    let cache: QueryCache<u32> = QueryCache::with_config(
        CacheConfig::new().with_retention(RetentionPolicy::GracePeriod(Duration::from_secs(10))),
    );

    let slot = cache.subscribe("n");
    cache.set("n", 1);
    drop(slot);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let _slot = cache.subscribe("n");

    tokio::time::sleep(Duration::from_secs(30)).await;
    tokio::task::yield_now().await;
    assert!(cache.contains("n"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_time_triggers_refetch() {
    let cache: QueryCache<String> =
        QueryCache::with_config(CacheConfig::new().with_stale_time(Duration::from_secs(30)));
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache.invoke("posts", slow_op(&calls, "a", Duration::ZERO));
    first.resolve().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let cached = cache.invoke("posts", slow_op(&calls, "b", Duration::ZERO));
    assert_eq!(cached.resolve().await.unwrap(), "a");
    assert_eq!(cached.version(), first.version());

    tokio::time::sleep(Duration::from_secs(30)).await;
    let refetched = cache.invoke("posts", slow_op(&calls, "b", Duration::ZERO));
    assert_eq!(refetched.resolve().await.unwrap(), "b");
    assert_eq!(refetched.version(), first.version() + 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

//! Integration tests covering the pool's acquire/release, hand-off,
//! cancellation, and reaping behavior end to end.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stripe_pool::{Config, Manager, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conn(u64);

#[derive(Debug, thiserror::Error)]
#[error("create failed")]
struct CreateError;

/// A manager whose `create` can be told to fail its next N calls, and which
/// records every id it has destroyed.
struct TestManager {
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    fail_next: AtomicUsize,
    destroyed: Mutex<Vec<u64>>,
}

impl TestManager {
    fn new() -> Self {
        TestManager {
            next_id: AtomicU64::new(0),
            create_calls: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    fn fail_next_creates(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn destroyed_ids(&self) -> Vec<u64> {
        self.destroyed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Manager for TestManager {
    type Resource = Conn;
    type Error = CreateError;

    async fn create(&self) -> Result<Conn, CreateError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(CreateError);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Conn(id))
    }

    async fn destroy(&self, resource: Conn) {
        self.destroyed.lock().unwrap().push(resource.0);
    }
}

/// Forwards to the shared `TestManager`, so a test can keep its own `Arc`
/// clone for assertions after handing one to `Pool::new`.
#[async_trait::async_trait]
impl Manager for Arc<TestManager> {
    type Resource = Conn;
    type Error = CreateError;

    async fn create(&self) -> Result<Conn, CreateError> {
        TestManager::create(self).await
    }

    async fn destroy(&self, resource: Conn) {
        TestManager::destroy(self, resource).await
    }
}

fn config(max_resources: usize, num_stripes: usize, cache_ttl: Duration) -> Config {
    Config {
        cache_ttl,
        max_resources,
        num_stripes: Some(num_stripes),
    }
}

#[tokio::test]
async fn basic_reuse_returns_the_same_handle() {
    let pool = Pool::new(TestManager::new(), config(2, 1, Duration::from_secs(10))).unwrap();

    let (first, local) = pool.take_resource().await.unwrap();
    pool.put_resource(local, first);

    let (second, _local) = pool.take_resource().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn saturated_pool_hands_resource_directly_to_waiter() {
    let pool = Pool::new(TestManager::new(), config(1, 1, Duration::from_secs(10))).unwrap();

    let (r, local) = pool.take_resource().await.unwrap();

    let waiting_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiting_pool.take_resource().await });

    // Give the waiter a chance to park before we free the only resource.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    pool.put_resource(local, r);

    let (handed_off, _local) = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resolve promptly")
        .unwrap()
        .unwrap();

    assert_eq!(handed_off, r);
}

#[tokio::test]
async fn cancelled_waiter_does_not_lose_the_resource() {
    let manager = TestManager::new();
    let pool = Pool::new(manager, config(1, 1, Duration::from_secs(10))).unwrap();

    let (r, local) = pool.take_resource().await.unwrap();

    let waiting_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiting_pool.take_resource().await });
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // Cancel the parked waiter by dropping its task.
    waiter.abort();
    let _ = waiter.await;
    tokio::task::yield_now().await;

    pool.put_resource(local, r);

    // No waiter remains: r should have landed in the cache, and the next
    // acquire reuses it without calling `create` again.
    let (reused, _local) = pool.take_resource().await.unwrap();
    assert_eq!(reused, r);
}

#[tokio::test]
async fn creator_failure_restores_the_permit() {
    let manager = TestManager::new();
    manager.fail_next_creates(1);
    let pool = Pool::new(manager, config(1, 1, Duration::from_secs(10))).unwrap();

    let first = pool.take_resource().await;
    assert!(first.is_err());

    let (_resource, _local) = pool.take_resource().await.expect("second attempt should succeed");
}

#[tokio::test(start_paused = true)]
async fn reaper_evicts_entries_past_the_ttl() {
    let manager = Arc::new(TestManager::new());
    let pool = Pool::new(manager.clone(), config(1, 1, Duration::from_millis(500))).unwrap();

    let (r, local) = pool.take_resource().await.unwrap();
    pool.put_resource(local, r);
    assert_eq!(manager.create_call_count(), 1);

    // Past the TTL, plus one reaper tick.
    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::time::advance(Duration::from_millis(500)).await;
    tokio::task::yield_now().await;

    // The reaper must have destroyed the cached resource by now.
    assert_eq!(manager.destroyed_ids(), vec![r.0]);

    let (_resource, _local) = pool.take_resource().await.unwrap();
    // A fresh resource was created rather than reusing the evicted one.
    assert_eq!(manager.create_call_count(), 2);
}

/// Round-robin allocation is exposed indirectly via `Pool::stripe_count`;
/// the per-stripe capacities are unit-tested directly in `src/striping.rs`.
#[tokio::test]
async fn stripe_count_is_clamped_to_capacity() {
    let pool = Pool::new(TestManager::new(), config(3, 5, Duration::from_secs(10))).unwrap();
    assert_eq!(pool.stripe_count(), 3);
}

/// `destroy_resource` releases the permit before the (slow) destructor
/// finishes, so other waiters are never starved by it.
#[tokio::test]
async fn destroy_resource_releases_permit_before_destructor_runs() {
    let manager = TestManager::new();
    let pool = Pool::new(manager, config(1, 1, Duration::from_secs(10))).unwrap();

    let (r, local) = pool.take_resource().await.unwrap();
    pool.destroy_resource(local, r).await;

    let (_resource, _local) = pool.take_resource().await.unwrap();
}

/// `destroy_all_resources` is idempotent: a second call in a row destroys
/// nothing further.
#[tokio::test]
async fn destroy_all_is_idempotent() {
    let manager = TestManager::new();
    let pool = Pool::new(manager, config(2, 1, Duration::from_secs(10))).unwrap();

    let (a, local_a) = pool.take_resource().await.unwrap();
    let (b, local_b) = pool.take_resource().await.unwrap();
    pool.put_resource(local_a, a);
    pool.put_resource(local_b, b);

    pool.destroy_all_resources().await;
    pool.destroy_all_resources().await;

    // Both cached entries were destroyed exactly once each.
    let (_resource, _local) = pool.take_resource().await.unwrap();
}

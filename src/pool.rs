//! The public entry points and pool lifecycle.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_channel::oneshot;
use tracing::debug;

use crate::error::{ConfigError, Error};
use crate::manager::Manager;
use crate::reaper;
use crate::selector::select_stripe;
use crate::stripe::{Handoff, Stripe, TryAcquire};
use crate::striping;

const MIN_CACHE_TTL: Duration = Duration::from_millis(500);

/// Pool configuration, validated once at [`Pool::new`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum idle age before the reaper evicts a cached resource.
    /// Must be at least 500ms.
    pub cache_ttl: Duration,
    /// Hard cap on concurrently live resources across all stripes.
    /// Must be at least 1.
    pub max_resources: usize,
    /// Shard count. Defaults to the logical CPU count when absent; clamped
    /// down to `max_resources` regardless.
    pub num_stripes: Option<usize>,
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl < MIN_CACHE_TTL {
            return Err(ConfigError::CacheTtlTooShort(self.cache_ttl));
        }
        if self.max_resources < 1 {
            return Err(ConfigError::MaxResourcesZero);
        }
        if self.num_stripes == Some(0) {
            return Err(ConfigError::NumStripesZero);
        }
        Ok(())
    }
}

struct PoolInner<M: Manager> {
    manager: Arc<M>,
    stripes: Arc<[Stripe<M::Resource>]>,
    cpus: NonZeroUsize,
    // Held only to be dropped: that's what tells the reaper (racing this
    // channel against its sleep) to stop.
    reaper_shutdown: oneshot::Sender<std::convert::Infallible>,
}

impl<M: Manager> Drop for PoolInner<M> {
    fn drop(&mut self) {
        // Best-effort: drain and destroy every stripe's cache. Spawning
        // is necessary because `Drop` cannot `.await`; if there is no
        // runtime left to spawn onto (the whole process is tearing down),
        // the cached resources are simply leaked along with the process.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = self.manager.clone();
            let stripes = self.stripes.clone();
            handle.spawn(async move {
                for stripe in stripes.iter() {
                    let drained = stripe.drain_cache();
                    debug!(stripe = stripe.index, count = drained.len(), "pool dropped: draining cached resources");
                    for resource in drained {
                        manager.destroy(resource).await;
                    }
                }
            });
        }
    }
}

/// The top-level pool handle. Cheap to clone (an `Arc` underneath); the
/// underlying stripes and reaper task are torn down when the last clone
/// drops.
pub struct Pool<M: Manager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("stripes", &self.inner.stripes.len())
            .finish_non_exhaustive()
    }
}

/// Returned alongside a resource from [`Pool::take_resource`]; threads the
/// stripe it came from back into [`Pool::put_resource`] or
/// [`Pool::destroy_resource`].
pub struct LocalPool<M: Manager> {
    pool: Pool<M>,
    index: usize,
}

impl<M: Manager> LocalPool<M> {
    /// The stable, 0-based index of the stripe this handle refers to.
    pub fn stripe_index(&self) -> usize {
        self.index
    }

    fn stripe(&self) -> &Stripe<M::Resource> {
        &self.pool.inner.stripes[self.index]
    }
}

impl<M: Manager> fmt::Debug for LocalPool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPool").field("index", &self.index).finish()
    }
}

impl<M: Manager> Pool<M> {
    /// Validates `config` and builds the striped pool. Fails synchronously
    /// if the config is rejected; never touches `manager.create` (resources
    /// are created lazily, on first acquire).
    ///
    /// Must be called from within a Tokio runtime: construction spawns the
    /// background reaper.
    pub fn new(manager: M, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        let cpus = NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::new(1).unwrap());
        let requested_stripes = config.num_stripes.unwrap_or(cpus.get());
        let capacities = striping::per_stripe_capacities(config.max_resources, requested_stripes);

        let stripes: Arc<[Stripe<M::Resource>]> = capacities
            .into_iter()
            .enumerate()
            .map(|(index, capacity)| Stripe::new(index, capacity))
            .collect::<Vec<_>>()
            .into();

        let manager = Arc::new(manager);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(reaper::run(
            manager.clone(),
            stripes.clone(),
            config.cache_ttl,
            shutdown_rx,
        ));

        Ok(Pool {
            inner: Arc::new(PoolInner {
                manager,
                stripes,
                cpus,
                reaper_shutdown: shutdown_tx,
            }),
        })
    }

    /// The number of stripes this pool was built with.
    pub fn stripe_count(&self) -> usize {
        self.inner.stripes.len()
    }

    /// Acquires a resource, suspending if the chosen stripe is
    /// saturated. May fail with the manager's creator failure, in which
    /// case the reserved permit is restored before the error is returned.
    pub async fn take_resource(&self) -> Result<(M::Resource, LocalPool<M>), Error<M::Error>> {
        let stripes = NonZeroUsize::new(self.inner.stripes.len()).expect("at least one stripe");
        let index = select_stripe(stripes, self.inner.cpus);
        let stripe = &self.inner.stripes[index];

        let resource = acquire_from_stripe(&self.inner.manager, stripe).await?;

        Ok((
            resource,
            LocalPool {
                pool: self.clone(),
                index,
            },
        ))
    }

    /// Returns a resource to its stripe's cache, or hands it directly
    /// to a waiter if one is parked. Never fails observably.
    pub fn put_resource(&self, local: LocalPool<M>, resource: M::Resource) {
        local.stripe().signal(Handoff::Resource(resource));
    }

    /// Releases `local`'s permit and destroys `resource`. The permit
    /// is released (and, if a waiter is parked, handed off) before the
    /// (possibly slow) destructor runs, so a stuck destructor cannot starve
    /// other waiters.
    pub async fn destroy_resource(&self, local: LocalPool<M>, resource: M::Resource) {
        local.stripe().signal(Handoff::Permit);
        self.inner.manager.destroy(resource).await;
    }

    /// Destroys every currently-cached (idle) resource across all
    /// stripes. Does not touch resources presently checked out by callers.
    /// Idempotent: calling it twice in a row destroys nothing the second
    /// time, since the first call already emptied every cache.
    pub async fn destroy_all_resources(&self) {
        for stripe in self.inner.stripes.iter() {
            for resource in stripe.drain_cache() {
                self.inner.manager.destroy(resource).await;
                stripe.signal(Handoff::Permit);
            }
        }
    }
}

/// The acquire state machine for a single stripe. Not a
/// hand-written `Future` impl — an ordinary `async fn` is enough, because
/// the two cancellation-sensitive steps (a reserved-but-uncreated permit,
/// and a parked wait) are each guarded by a small RAII type whose `Drop`
/// does the right thing if this whole `async fn`'s generator is dropped
/// mid-poll.
async fn acquire_from_stripe<M: Manager>(
    manager: &M,
    stripe: &Stripe<M::Resource>,
) -> Result<M::Resource, Error<M::Error>> {
    match stripe.try_acquire() {
        TryAcquire::Resource(resource) => Ok(resource),
        TryAcquire::Permit => {
            let mut guard = PermitGuard::direct(stripe);
            let resource = manager.create().await.map_err(Error::Create)?;
            guard.defuse();
            Ok(resource)
        }
        TryAcquire::Parked(rx) => {
            let waiter = ParkedWaiter::new(stripe, rx);
            match waiter.await.map_err(|Closed| Error::Closed)? {
                Handoff::Resource(resource) => Ok(resource),
                Handoff::Permit => {
                    let mut guard = PermitGuard::via_signal(stripe);
                    let resource = manager.create().await.map_err(Error::Create)?;
                    guard.defuse();
                    Ok(resource)
                }
            }
        }
    }
}

/// Whether a reserved-but-not-yet-created permit, if abandoned, is restored
/// by a plain increment or by a full `signal` drain.
///
/// The direct case (a fresh `available` decrement) can never have a waiter
/// parked behind it — waiters only ever form once `available` has already
/// hit zero. The via-signal case follows a hand-off: another caller may
/// have parked on this stripe in the interim, and that caller must be
/// served first rather than silently left behind.
enum RestoreKind {
    Direct,
    ViaSignal,
}

struct PermitGuard<'a, R> {
    stripe: &'a Stripe<R>,
    kind: RestoreKind,
    armed: bool,
}

impl<'a, R> PermitGuard<'a, R> {
    fn direct(stripe: &'a Stripe<R>) -> Self {
        PermitGuard {
            stripe,
            kind: RestoreKind::Direct,
            armed: true,
        }
    }

    fn via_signal(stripe: &'a Stripe<R>) -> Self {
        PermitGuard {
            stripe,
            kind: RestoreKind::ViaSignal,
            armed: true,
        }
    }

    /// Call once `create` has succeeded: the permit now backs a live
    /// resource and must not be restored.
    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl<'a, R> Drop for PermitGuard<'a, R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.kind {
            RestoreKind::Direct => self.stripe.restore_unparked_permit(),
            RestoreKind::ViaSignal => self.stripe.signal(Handoff::Permit),
        }
    }
}

/// The pool was torn down while a [`ParkedWaiter`] was parked. Kept
/// separate from [`Error`] so `ParkedWaiter` doesn't need to carry a
/// `Manager::Error` type parameter it has no other use for; folded into
/// [`Error::Closed`] at the call site.
struct Closed;

/// Awaits the rendezvous cell a parked acquire was given. If dropped before
/// resolving, forwards the hand-off instead of swallowing it.
struct ParkedWaiter<'a, R> {
    stripe: &'a Stripe<R>,
    rx: Option<oneshot::Receiver<Handoff<R>>>,
}

impl<'a, R> ParkedWaiter<'a, R> {
    fn new(stripe: &'a Stripe<R>, rx: oneshot::Receiver<Handoff<R>>) -> Self {
        ParkedWaiter {
            stripe,
            rx: Some(rx),
        }
    }
}

impl<'a, R> Future for ParkedWaiter<'a, R> {
    type Output = Result<Handoff<R>, Closed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let rx = this
            .rx
            .as_mut()
            .expect("ParkedWaiter polled again after resolving");
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(handoff)) => {
                this.rx = None;
                Poll::Ready(Ok(handoff))
            }
            // The stripe (and so every waiter's sender) was dropped while
            // we were parked: the pool itself is gone. Surfaced as a
            // dedicated error variant rather than a panic.
            Poll::Ready(Err(futures_channel::oneshot::Canceled)) => {
                this.rx = None;
                Poll::Ready(Err(Closed))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<'a, R> Drop for ParkedWaiter<'a, R> {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            self.stripe.abandon_wait(rx);
        }
    }
}

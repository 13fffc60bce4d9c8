//! Per-stripe state and the `signal` transition.

use std::sync::Mutex;
use std::time::Duration;

use futures_channel::oneshot;
use tokio::time::Instant;
use tracing::trace;

use crate::deque::Deque;

/// What a released permit carries back into [`Stripe::signal`]: either a
/// live resource (put), or nothing — a bare permit (destroy, reap, or a
/// failed create restoring a waiter's permit).
pub(crate) enum Handoff<R> {
    Resource(R),
    Permit,
}

struct Entry<R> {
    resource: R,
    last_used: Instant,
}

struct StripeState<R> {
    available: usize,
    cache: Vec<Entry<R>>,
    waiters: Deque<oneshot::Sender<Handoff<R>>>,
}

/// One shard of the pool. `index` is stable and 0-based; `capacity` is this
/// stripe's slice of `max_resources` as computed by [`crate::striping`].
pub(crate) struct Stripe<R> {
    pub(crate) index: usize,
    pub(crate) capacity: usize,
    state: Mutex<StripeState<R>>,
}

/// What [`Stripe::try_acquire`] tells the caller to do next.
pub(crate) enum TryAcquire<R> {
    /// A cached resource was consumed directly; `available` is untouched.
    Resource(R),
    /// A permit was reserved; the caller must call `create` and, on
    /// failure, [`Stripe::restore_unparked_permit`].
    Permit,
    /// The stripe is saturated; the caller is now parked on `rx` and must
    /// await it.
    Parked(oneshot::Receiver<Handoff<R>>),
}

impl<R> Stripe<R> {
    pub(crate) fn new(index: usize, capacity: usize) -> Self {
        Stripe {
            index,
            capacity,
            state: Mutex::new(StripeState {
                available: capacity,
                cache: Vec::new(),
                waiters: Deque::new(),
            }),
        }
    }

    /// Consume the cache, reserve a permit, or park.
    pub(crate) fn try_acquire(&self) -> TryAcquire<R> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.cache.pop() {
            trace!(stripe = self.index, "acquire: reused cached resource");
            return TryAcquire::Resource(entry.resource);
        }
        if state.available > 0 {
            state.available -= 1;
            trace!(stripe = self.index, available = state.available, "acquire: reserved permit for create");
            return TryAcquire::Permit;
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        trace!(stripe = self.index, waiters = state.waiters.len(), "acquire: parked");
        TryAcquire::Parked(rx)
    }

    /// Restore a permit that was reserved directly (not via a
    /// waiter hand-off) when `create` then failed. No waiter can be parked
    /// in this situation: a waiter only ever exists once `available` has
    /// already hit zero, and this path only runs when `available` was
    /// strictly positive a moment ago.
    pub(crate) fn restore_unparked_permit(&self) {
        let mut state = self.state.lock().unwrap();
        state.available += 1;
        debug_assert!(state.available <= self.capacity);
    }

    /// The central `signal` transition, used by put, destroy, reap,
    /// and a waiter's own failed `create` restoring its permit.
    pub(crate) fn signal(&self, mut handoff: Handoff<R>) {
        let mut state = self.state.lock().unwrap();
        while let Some(tx) = state.waiters.pop_front() {
            match tx.send(handoff) {
                Ok(()) => {
                    trace!(stripe = self.index, "signal: handed off to waiter");
                    return;
                }
                Err(returned) => {
                    // The waiter's future was dropped: discard it and keep
                    // draining for a live one.
                    trace!(stripe = self.index, "signal: skipped a cancelled waiter");
                    handoff = returned;
                }
            }
        }

        match handoff {
            Handoff::Resource(resource) => {
                state.cache.push(Entry {
                    resource,
                    last_used: Instant::now(),
                });
                trace!(stripe = self.index, cached = state.cache.len(), "signal: cached resource");
            }
            Handoff::Permit => {
                state.available += 1;
                debug_assert!(state.available <= self.capacity);
                trace!(stripe = self.index, available = state.available, "signal: released permit");
            }
        }
    }

    /// Called from the acquire future's `Drop` when it was parked and
    /// never resolved. Returns the stray value to `signal` if the cell had
    /// already been filled in the race window between the last poll and
    /// the drop; otherwise the receiver's own drop is the tombstone.
    pub(crate) fn abandon_wait(&self, mut rx: oneshot::Receiver<Handoff<R>>) {
        if let Ok(Some(handoff)) = rx.try_recv() {
            self.signal(handoff);
        }
    }

    /// Partitions the cache by staleness, replacing it with the fresh
    /// half and returning the stale entries' resources for the caller to
    /// destroy (outside the stripe mutex) and release permits for.
    pub(crate) fn sweep_stale(&self, ttl: Duration, now: Instant) -> Vec<R> {
        let mut state = self.state.lock().unwrap();
        let mut stale = Vec::new();
        let mut fresh = Vec::with_capacity(state.cache.len());
        for entry in state.cache.drain(..) {
            if now.saturating_duration_since(entry.last_used) > ttl {
                stale.push(entry.resource);
            } else {
                fresh.push(entry);
            }
        }
        state.cache = fresh;
        stale
    }

    /// Takes the entire cache for `destroy_all_resources`, leaving it
    /// empty. Callers destroy the returned resources and release a permit
    /// per entry (via `signal(Permit)`) outside the stripe mutex.
    pub(crate) fn drain_cache(&self) -> Vec<R> {
        let mut state = self.state.lock().unwrap();
        state.cache.drain(..).map(|entry| entry.resource).collect()
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.state.lock().unwrap().available
    }

    #[cfg(test)]
    pub(crate) fn cache_len(&self) -> usize {
        self.state.lock().unwrap().cache.len()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.state.lock().unwrap().waiters.len()
    }
}

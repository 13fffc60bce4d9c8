//! The background TTL-eviction task.

use std::sync::Arc;
use std::time::Duration;

use futures_channel::oneshot;
use tokio::time::Instant;
use tracing::trace;

use crate::manager::Manager;
use crate::stripe::{Handoff, Stripe};

const TICK: Duration = Duration::from_secs(1);

/// Runs until `shutdown` resolves (the pool's inner value was dropped).
/// Races the sleep against a `oneshot::Receiver<Infallible>` rather than
/// polling a shared flag.
pub(crate) async fn run<M: Manager>(
    manager: Arc<M>,
    stripes: Arc<[Stripe<M::Resource>]>,
    cache_ttl: Duration,
    mut shutdown: oneshot::Receiver<std::convert::Infallible>,
) {
    loop {
        let sleep = tokio::time::sleep(TICK);
        tokio::select! {
            _ = &mut shutdown => {
                trace!("reaper: pool dropped, shutting down");
                return;
            }
            _ = sleep => {}
        }

        let now = Instant::now();
        for stripe in stripes.iter() {
            let stale = stripe.sweep_stale(cache_ttl, now);
            if stale.is_empty() {
                continue;
            }
            trace!(stripe = stripe.index, evicted = stale.len(), "reaper: evicting stale entries");
            for resource in stale {
                manager.destroy(resource).await;
                // Route the freed permit through `signal` rather than a
                // bare increment: a waiter may have parked on this stripe
                // in the window between the sweep and this destroy, and it
                // must be served immediately (the hand-off law applies to
                // reap-driven releases too).
                stripe.signal(Handoff::Permit);
            }
        }
    }
}

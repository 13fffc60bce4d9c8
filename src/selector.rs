//! Chooses a stripe for a caller based on thread/CPU affinity.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

thread_local! {
    // A stable per-thread identity for the hash fallback, distinct from
    // `std::thread::ThreadId`'s `Debug`-only representation.
    static THREAD_TAG: Cell<Option<u64>> = Cell::new(None);
}

fn thread_tag() -> u64 {
    THREAD_TAG.with(|cell| {
        if let Some(tag) = cell.get() {
            return tag;
        }
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        let tag = hasher.finish();
        cell.set(Some(tag));
        tag
    })
}

/// Picks a stripe index in `0..stripes` for the calling thread.
///
/// `stripes` must be non-zero; `cpus` is the logical CPU count used to
/// decide between the CPU-affinity fast path and the thread-id hash
/// fallback.
pub(crate) fn select_stripe(stripes: NonZeroUsize, cpus: NonZeroUsize) -> usize {
    let stripes = stripes.get();
    if stripes == 1 {
        return 0;
    }

    let cpus = cpus.get();
    if stripes < cpus && cpus % stripes != 0 {
        // An uneven CPU-to-stripe mapping would skew load if we assigned by
        // running CPU, so fall back to a stable per-thread hash.
        return (thread_tag() as usize) % stripes;
    }

    match running_cpu() {
        Some(cpu) => cpu % stripes,
        None => (thread_tag() as usize) % stripes,
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn running_cpu() -> Option<usize> {
    // SAFETY: `sched_getcpu` is a plain syscall wrapper with no preconditions.
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        None
    } else {
        Some(cpu as usize)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn running_cpu() -> Option<usize> {
    None
}

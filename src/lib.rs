//! A striped, asynchronous resource pool.
//!
//! [`Pool`] hands out expensive, reusable resources — canonically database
//! connections, but anything with a nontrivial construction cost fits —
//! enforcing a hard cap on how many exist concurrently, caching idle ones
//! for reuse up to a TTL, reaping stale entries in the background, and
//! serving saturated-pool callers fairly, FIFO, via direct hand-off rather
//! than a thundering-herd wakeup.
//!
//! The pool is *striped*: its capacity is split across `N` independently
//! locked shards (stripes), each handling its own cache and waiter queue.
//! A caller is steered to a stripe by thread/CPU affinity, trading perfect
//! fairness for avoiding a single global lock under contention.
//!
//! This crate deliberately does **not** provide a scoped, auto-returning
//! "checkout" guard — callers call [`Pool::put_resource`] or
//! [`Pool::destroy_resource`] explicitly.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use stripe_pool::{Config, Manager, Pool};
//!
//! struct Noop;
//!
//! #[async_trait::async_trait]
//! impl Manager for Noop {
//!     type Resource = ();
//!     type Error = Infallible;
//!
//!     async fn create(&self) -> Result<(), Infallible> {
//!         Ok(())
//!     }
//!
//!     async fn destroy(&self, _resource: ()) {}
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(
//!     Noop,
//!     Config {
//!         cache_ttl: Duration::from_secs(30),
//!         max_resources: 10,
//!         num_stripes: None,
//!     },
//! )?;
//!
//! let (resource, local) = pool.take_resource().await?;
//! pool.put_resource(local, resource);
//! # Ok(())
//! # }
//! ```

mod deque;
mod error;
mod manager;
mod pool;
mod reaper;
mod selector;
mod stripe;
mod striping;

pub use error::{ConfigError, Error};
pub use manager::Manager;
pub use pool::{Config, LocalPool, Pool};

use std::error::Error as StdError;

/// The user-supplied contract for creating and destroying pooled resources.
///
/// This is the one collaborator the core pool does not implement itself —
/// see the crate-level docs for the scope boundary. A `Manager` knows how
/// to produce a fresh [`Resource`](Manager::Resource) and how to tear one
/// down; everything about when to call either is the pool's job.
#[async_trait::async_trait]
pub trait Manager: Send + Sync + 'static {
    /// The pooled resource type, e.g. a database connection.
    type Resource: Send + 'static;
    /// The error a failed `create` reports to the caller of `take_resource`.
    type Error: StdError + Send + Sync + 'static;

    /// Creates a brand new resource. May fail; on failure the pool restores
    /// the permit it reserved before propagating the error.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Tears down a resource that is leaving the pool for good (explicit
    /// destroy, reap, or destroy-all). Any failure is the manager's to log;
    /// the pool does not observe or retry it.
    async fn destroy(&self, resource: Self::Resource);
}

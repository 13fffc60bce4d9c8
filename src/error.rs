use std::time::Duration;

/// Rejected a [`Config`](crate::Config) at construction time.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `cache_ttl` was below the 500ms floor.
    #[error("cache_ttl must be at least 500ms, got {0:?}")]
    CacheTtlTooShort(Duration),
    /// `max_resources` was zero.
    #[error("max_resources must be at least 1")]
    MaxResourcesZero,
    /// `num_stripes` was explicitly set to zero.
    #[error("num_stripes must be at least 1 if set")]
    NumStripesZero,
}

/// The failure surface of [`Pool::take_resource`](crate::Pool::take_resource).
///
/// `Create` covers the creator failing, with its permit restored before the
/// error is returned. `Closed` covers a caller parked on a saturated stripe
/// when the whole pool is torn down out from under it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// The [`Manager::create`](crate::Manager::create) call failed. The
    /// permit it would have consumed has already been restored.
    #[error("failed to create a pooled resource: {0}")]
    Create(#[source] E),
    /// The pool was dropped while this caller was parked waiting for a
    /// resource to free up.
    #[error("the pool was closed while waiting for a resource")]
    Closed,
}

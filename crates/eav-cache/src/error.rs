//! Error types for the props cache.

use eav_types::TypeRef;

/// Errors that can occur while using the props cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Only saved entities can be cached.
    #[error("cannot cache an unsaved {0:?} entity")]
    Unidentified(TypeRef),

    /// A lock was poisoned by a panicking writer.
    #[error("cache lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Convenience alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;

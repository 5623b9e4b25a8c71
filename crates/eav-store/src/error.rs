use eav_types::EntityId;

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row required by the operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity row does not exist.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// A key, uniqueness or foreign-key constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A shared lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// The operation is not available on this backend.
    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    /// The id allocator returned fewer ids than requested.
    #[error("id allocator returned fewer than {0} ids")]
    IdsExhausted(usize),

    /// Driver-level failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

//! Error types for the engine.

use eav_cache::CacheError;
use eav_diff::DiffError;
use eav_graph::GraphError;
use eav_schema::SchemaError;
use eav_store::{PurgeStatus, StoreError};
use eav_types::{EntityId, PurgeTaskId, TypeError};

/// Errors surfaced by [`Engine`](crate::Engine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An update targeted an entity that does not exist and the missing-entity
    /// policy is `throw`.
    #[error("entity {0} does not exist")]
    MissingEntity(EntityId),

    #[error("entity {0} not found")]
    NotFound(EntityId),

    /// The configured strategy needs a capability the backend lacks.
    #[error("unsupported persistence strategy: {0}")]
    UnsupportedStrategy(String),

    /// A stored scheme has no registered application type.
    #[error("no type registered for scheme {0}")]
    UnregisteredType(String),

    /// Subtrees go through `mark_for_deletion` and `purge`.
    #[error("entity {id} still has {children} child objects")]
    HasChildren { id: EntityId, children: usize },

    #[error("purge task {0} not found")]
    PurgeTaskNotFound(PurgeTaskId),

    /// The task is finished or held by a live worker.
    #[error("purge task {task} is not available ({status:?}, worker {worker:?})")]
    PurgeTaskUnavailable {
        task: PurgeTaskId,
        status: PurgeStatus,
        worker: Option<String>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

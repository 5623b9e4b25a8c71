use eav_hash::HashError;
use eav_store::StoreError;
use eav_types::{StructureId, TypeError};

/// Errors from schema synchronization and structure-tree operations.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// A field's type cannot be mapped onto a storage kind.
    #[error("unsupported field type for {field}: {reason}")]
    UnsupportedFieldType { field: String, reason: String },

    /// More than one persisted structure matches a field.
    #[error("ambiguous structure {name} under {parent:?} in scheme {scheme}")]
    AmbiguousStructure {
        scheme: String,
        parent: Option<StructureId>,
        name: String,
    },

    /// The scheme does not exist.
    #[error("scheme not found: {0}")]
    SchemeNotFound(String),

    /// A structure or structure path does not exist.
    #[error("structure not found: {0}")]
    StructureNotFound(String),

    /// A persisted structure points at a parent outside its scheme.
    #[error("structure {id} references missing parent {parent}")]
    DanglingStructure { id: StructureId, parent: StructureId },

    /// A composite type contains itself.
    #[error("cyclic composite: {path}")]
    CyclicComposite { path: String },

    /// Composite nesting is deeper than the configured bound.
    #[error("composite nesting of {type_name} exceeds depth {max_depth}")]
    DepthExceeded { type_name: String, max_depth: usize },

    /// A cache lock was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

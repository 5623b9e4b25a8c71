use eav_types::{StructureId, TypeError, ValueId};

/// Errors from graph traversal, encoding, decoding and ordering.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A live value does not fit the shape of its persisted structure.
    #[error("shape mismatch at {field}: expected {expected}, found {found}")]
    ShapeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// A non-nullable field holds no value.
    #[error("required field is null: {0}")]
    MissingRequired(String),

    /// A reference was encoded before its target received an id.
    #[error("reference without id at {0}")]
    UnresolvedReference(String),

    /// Composite nesting in user data is deeper than the bound.
    #[error("composite nesting exceeds depth {max_depth} at {field}")]
    DepthExceeded { field: String, max_depth: usize },

    /// The id allocator handed out fewer ids than requested.
    #[error("ran out of allocated ids")]
    IdsExhausted,

    /// Rows whose parent links form a cycle.
    #[error("dependency cycle through value {0}")]
    DependencyCycle(ValueId),

    /// A value row belongs to a structure missing from the tree.
    #[error("value {value} references unknown structure {structure}")]
    UnknownStructure { value: ValueId, structure: StructureId },

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid numeric literal: {0}")]
    InvalidNumeric(String),

    #[error("numeric overflow")]
    NumericOverflow,

    #[error("cannot parse dictionary key {raw:?} as {kind}")]
    InvalidKey { raw: String, kind: String },

    #[error("field {field}: expected {expected}, found {found}")]
    FieldType {
        field: String,
        expected: String,
        found: String,
    },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("unknown storage type id: {0}")]
    UnknownStorageType(i64),

    #[error("type catalog has no entry for {0}")]
    IncompleteCatalog(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;

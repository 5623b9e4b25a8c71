//! Schema layer of the EAV object store.
//!
//! A scheme is the persisted shape of one application type; its structures
//! form a tree that mirrors the type's fields, with nested composites as
//! subtrees. This crate builds that tree in memory ([`StructureTree`]),
//! caches it per process ([`SchemaCache`]), and keeps it in step with the
//! type's descriptor ([`SchemaSynchronizer`]).

pub mod cache;
pub mod error;
pub mod sync;
pub mod tree;

pub use cache::SchemaCache;
pub use error::{SchemaError, SchemaResult};
pub use sync::{
    ClearValuesMigration, SchemaSynchronizer, SyncOptions, SyncOutcome, SyncReport,
    TypeMigrationHook,
};
pub use tree::{ElementKind, StructureKind, StructureNode, StructureTree};

//! Object-graph persistence over an entity-attribute-value store.
//!
//! An [`Engine`] saves graphs of [`Entity`](eav_types::Entity) values, with
//! nested composites, collections and references to other entities, into
//! the relational rows of an [`eav_store::Backend`], and loads them back.
//!
//! # Save
//!
//! Schemes are synchronized on first use. Within one transaction every
//! entity is row-locked, new entities receive ids, content hashes are
//! sealed bottom-up and value rows are written by the configured
//! [`Strategy`]: delete-and-insert, or change tracking, which diffs against
//! the stored rows and writes only what changed.
//!
//! # Load
//!
//! Loads go through a props cache validated by content hash. Eager loads
//! return the whole reachable graph; lazy loads return a [`LazyEntity`]
//! whose payload is read on first access.
//!
//! # Delete
//!
//! [`Engine::delete`] removes one entity at once. Subtrees of the
//! hierarchical object tree are deleted in two phases:
//! [`Engine::mark_for_deletion`] records a purge task and [`Engine::purge`]
//! works through it in batches, resumable by another worker if abandoned.

pub mod config;
pub mod engine;
pub mod error;
pub mod lazy;
pub mod load;
pub mod registry;
pub mod save;
pub mod trash;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{EngineConfig, LoadMode, MissingEntityPolicy, Strategy};
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult};
pub use lazy::LazyEntity;
pub use load::Loaded;
pub use registry::TypeRegistry;
pub use save::SaveReport;
pub use trash::PurgeProgress;

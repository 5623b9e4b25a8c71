//! Foundation types for the EAV object store.
//!
//! This crate provides the identifiers, content hashes, native value model and
//! type descriptors used throughout the workspace. Every other crate depends
//! on `eav-types`.
//!
//! # Key Types
//!
//! - [`EntityId`], [`SchemeId`], [`StructureId`], [`ValueId`]: backend-allocated ids
//! - [`ContentHash`]: BLAKE3 digest used for change detection and cache validity
//! - [`Value`] / [`Record`] / [`DictKey`]: live field values
//! - [`Entity`] / [`EntityRef`]: persisted instances and references between them
//! - [`Persist`] / [`TypeDescriptor`] / [`TypeRef`]: compile-time type descriptors
//! - [`TypeCatalog`]: mapping between semantic kinds and storage columns

pub mod catalog;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod hash;
pub mod ids;
pub mod numeric;
pub mod value;

pub use catalog::{DbType, ScalarKind, StorageKind, TypeCatalog, TypeEntry};
pub use descriptor::{
    short_name, FieldDescriptor, FieldShape, FieldType, Persist, TypeDescriptor, TypeRef,
};
pub use entity::{Entity, EntityHeader, EntityRef, Shortcuts};
pub use error::{TypeError, TypeResult};
pub use hash::ContentHash;
pub use ids::{
    EntityId, ListItemId, PurgeTaskId, SchemeId, StorageTypeId, StructureId, UserId, ValueId,
};
pub use numeric::Numeric;
pub use value::{DictKey, FromValue, Record, Value};

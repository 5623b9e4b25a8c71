//! Change tracking for the EAV object store.
//!
//! [`diff_entity_values`] compares one entity's stored value rows with its
//! freshly encoded rows and returns the inserts, in-place updates and
//! deletes that reconcile them. Arrays are compared by position: reordering
//! elements shows up as an update at every shifted position.

pub mod error;
pub mod value_diff;

pub use error::{DiffError, DiffResult};
pub use value_diff::{diff_entity_values, ValueChanges};

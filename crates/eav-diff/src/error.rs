//! Error types for the diff crate.

use eav_types::{EntityId, StructureId, ValueId};

/// Errors that can occur while diffing value rows.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Two rows claim the same slot under one container.
    #[error("duplicate slot {structure} [{index:?}] under {parent:?}")]
    DuplicateSlot {
        parent: Option<ValueId>,
        structure: StructureId,
        index: Option<String>,
    },

    /// Old and new rows belong to different entities.
    #[error("rows of {found} mixed into the diff of {expected}")]
    MixedObjects { expected: EntityId, found: EntityId },

    /// Fewer ids than inserted rows.
    #[error("{needed} ids needed, {given} given")]
    NotEnoughIds { needed: usize, given: usize },
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;

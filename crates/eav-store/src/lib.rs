//! Relational backend boundary for the EAV object store.
//!
//! The engine never issues SQL itself. It talks to a [`Backend`] through a
//! small set of batched, async statements: reads of schemes, structures,
//! entity rows and value rows; id allocation; and a [`Transaction`] carrying
//! every write.
//!
//! [`InMemoryBackend`] implements the full boundary, including the
//! self-referencing `array_parent_id` foreign key and the optional
//! capabilities (value-level change tracking and server-side graph
//! projection), and backs the test suites of every downstream crate.

pub mod error;
pub mod memory;
pub mod projection;
pub mod rows;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryBackend, InMemoryTransaction, StoreStats};
pub use projection::GraphProjection;
pub use rows::{
    BackendCapabilities, CollectionKind, ObjectRow, PurgeStatus, PurgeTaskRow, SchemeKind,
    SchemeRow, StructureRow, ValueData, ValueRow,
};
pub use traits::{Backend, Transaction};

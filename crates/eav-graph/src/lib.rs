//! Object-graph encoding for the EAV object store.
//!
//! - [`collector`]: walk embedded entities to assign ids, seal content
//!   hashes and flatten a graph into persist order
//! - [`encoder`]: turn payloads into value rows, driven by the structure tree
//! - [`decoder`]: turn value rows back into payloads
//! - [`sorter`]: order value rows so containers precede their elements

pub mod collector;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod sorter;

pub use collector::{
    assign_ids, collect, count_unidentified, distinct_types, embedded_ids, external_refs,
    for_each_ref, for_each_ref_mut, seal_hashes,
};
pub use decoder::{decode_record, scalar_value};
pub use encoder::{scalar_data, EncodedBatch, ValueEncoder};
pub use error::{GraphError, GraphResult};
pub use sorter::sort_by_dependency;

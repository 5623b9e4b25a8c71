//! Content hashing for the EAV object store.
//!
//! Provides domain-separated BLAKE3 hashing and the [`HashCalculator`], which
//! derives the content hashes used for change detection: per entity, per
//! composite value, and per collection.
//!
//! Hashes are recomputed at every save and are the sole freshness criterion
//! of the props cache.

pub mod calculator;
pub mod hasher;

pub use calculator::{HashCalculator, NoRefs, RefHashes};
pub use hasher::{ContentHasher, HashError};

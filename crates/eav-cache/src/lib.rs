//! Props cache for the EAV object store.
//!
//! An explicitly constructed service, shared by reference between engines.
//! Entries are partitioned by cache domain and validated by content hash.

pub mod error;
pub mod props;

pub use error::{CacheError, CacheResult};
pub use props::{CachedEntity, CacheStats, PropsCache};

//! The props cache.
//!
//! [`PropsCache`] keeps materialized entities in memory, partitioned by a
//! cache domain so that engines bound to different backends never observe
//! each other's entries. Every entry carries the content hash it was cached
//! under; callers compare it against the backend before trusting the copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::trace;

use eav_types::{ContentHash, Entity, EntityId};

use crate::error::{CacheError, CacheResult};

/// A cached entity and the hash it was cached under.
#[derive(Clone, Debug)]
pub struct CachedEntity {
    pub hash: Option<ContentHash>,
    pub entity: Arc<Entity>,
}

impl CachedEntity {
    /// Returns `true` if the cached copy matches `current`.
    pub fn is_current(&self, current: Option<ContentHash>) -> bool {
        self.hash.is_some() && self.hash == current
    }
}

/// Hit and miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

type Domain = HashMap<EntityId, CachedEntity>;

/// Domain-partitioned entity cache.
///
/// Safe to share between concurrent save and load calls; all state sits
/// behind one `RwLock`.
#[derive(Debug, Default)]
pub struct PropsCache {
    domains: RwLock<HashMap<String, Domain>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn poisoned<E: std::fmt::Display>(e: E) -> CacheError {
    CacheError::LockPoisoned(e.to_string())
}

impl PropsCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity.
    pub fn get(&self, domain: &str, id: EntityId) -> CacheResult<Option<CachedEntity>> {
        let domains = self.domains.read().map_err(poisoned)?;
        let found = domains.get(domain).and_then(|d| d.get(&id)).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    /// Cache an entity under its current hash, replacing any older copy.
    pub fn put(&self, domain: &str, entity: Entity) -> CacheResult<Arc<Entity>> {
        let id = entity.id.ok_or(CacheError::Unidentified(entity.type_ref))?;
        let cached = CachedEntity {
            hash: entity.hash,
            entity: Arc::new(entity),
        };
        let shared = Arc::clone(&cached.entity);
        let mut domains = self.domains.write().map_err(poisoned)?;
        domains.entry(domain.to_string()).or_default().insert(id, cached);
        trace!(domain, id = %id, "cached entity");
        Ok(shared)
    }

    /// Drop one entry. Returns `true` if it was present.
    pub fn invalidate(&self, domain: &str, id: EntityId) -> CacheResult<bool> {
        let mut domains = self.domains.write().map_err(poisoned)?;
        Ok(domains
            .get_mut(domain)
            .map(|d| d.remove(&id).is_some())
            .unwrap_or(false))
    }

    /// Drop several entries; returns how many were present.
    pub fn invalidate_many(&self, domain: &str, ids: &[EntityId]) -> CacheResult<usize> {
        let mut domains = self.domains.write().map_err(poisoned)?;
        let Some(entries) = domains.get_mut(domain) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| entries.remove(id).is_some()).count())
    }

    /// Drop every entry of one domain.
    pub fn clear_domain(&self, domain: &str) -> CacheResult<()> {
        self.domains.write().map_err(poisoned)?.remove(domain);
        Ok(())
    }

    /// Drop everything.
    pub fn clear(&self) -> CacheResult<()> {
        self.domains.write().map_err(poisoned)?.clear();
        Ok(())
    }

    /// Number of entries in one domain.
    pub fn len(&self, domain: &str) -> CacheResult<usize> {
        let domains = self.domains.read().map_err(poisoned)?;
        Ok(domains.get(domain).map(HashMap::len).unwrap_or(0))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

//! Per-process caches of schemes and structure trees.
//!
//! [`SchemaCache`] remembers which type names were synchronized, the scheme
//! row per name, and the built [`StructureTree`] per scheme id. Every map
//! sits behind its own `RwLock`; entries are dropped only by explicit
//! invalidation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use eav_store::SchemeRow;
use eav_types::SchemeId;

use crate::error::{SchemaError, SchemaResult};
use crate::tree::StructureTree;

fn poisoned<E: std::fmt::Display>(e: E) -> SchemaError {
    SchemaError::LockPoisoned(e.to_string())
}

/// Scheme and structure-tree cache.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemes: RwLock<HashMap<String, SchemeRow>>,
    trees: RwLock<HashMap<SchemeId, Arc<StructureTree>>>,
    synced: RwLock<HashSet<String>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(&self, name: &str) -> SchemaResult<Option<SchemeRow>> {
        Ok(self.schemes.read().map_err(poisoned)?.get(name).cloned())
    }

    pub fn scheme_by_id(&self, id: SchemeId) -> SchemaResult<Option<SchemeRow>> {
        let schemes = self.schemes.read().map_err(poisoned)?;
        Ok(schemes.values().find(|s| s.id == id).cloned())
    }

    pub fn put_scheme(&self, scheme: SchemeRow) -> SchemaResult<()> {
        self.schemes
            .write()
            .map_err(poisoned)?
            .insert(scheme.name.clone(), scheme);
        Ok(())
    }

    pub fn tree(&self, scheme: SchemeId) -> SchemaResult<Option<Arc<StructureTree>>> {
        Ok(self.trees.read().map_err(poisoned)?.get(&scheme).cloned())
    }

    pub fn put_tree(&self, tree: Arc<StructureTree>) -> SchemaResult<()> {
        self.trees
            .write()
            .map_err(poisoned)?
            .insert(tree.scheme_id(), tree);
        Ok(())
    }

    /// Whether the type name was synchronized since the last invalidation.
    pub fn is_synced(&self, type_name: &str) -> SchemaResult<bool> {
        Ok(self.synced.read().map_err(poisoned)?.contains(type_name))
    }

    pub fn mark_synced(&self, type_name: &str) -> SchemaResult<()> {
        self.synced
            .write()
            .map_err(poisoned)?
            .insert(type_name.to_string());
        Ok(())
    }

    /// Drop everything cached for one scheme.
    pub fn invalidate(&self, name: &str, scheme: Option<SchemeId>) -> SchemaResult<()> {
        let removed = self.schemes.write().map_err(poisoned)?.remove(name);
        let mut trees = self.trees.write().map_err(poisoned)?;
        for id in scheme.into_iter().chain(removed.map(|s| s.id)) {
            trees.remove(&id);
        }
        self.synced.write().map_err(poisoned)?.remove(name);
        Ok(())
    }

    /// Drop every entry.
    pub fn clear(&self) -> SchemaResult<()> {
        self.schemes.write().map_err(poisoned)?.clear();
        self.trees.write().map_err(poisoned)?.clear();
        self.synced.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eav_store::SchemeKind;
    use eav_types::TypeCatalog;

    fn scheme(id: i64, name: &str) -> SchemeRow {
        SchemeRow {
            id: SchemeId::new(id),
            name: name.into(),
            alias: None,
            kind: SchemeKind::Object,
            structure_hash: None,
        }
    }

    #[test]
    fn invalidate_drops_scheme_and_tree() {
        let cache = SchemaCache::new();
        cache.put_scheme(scheme(1, "a::A")).unwrap();
        let tree = StructureTree::build(SchemeId::new(1), vec![], &TypeCatalog::builtin()).unwrap();
        cache.put_tree(Arc::new(tree)).unwrap();
        cache.mark_synced("a::A").unwrap();

        cache.invalidate("a::A", None).unwrap();
        assert!(cache.scheme("a::A").unwrap().is_none());
        assert!(cache.tree(SchemeId::new(1)).unwrap().is_none());
        assert!(!cache.is_synced("a::A").unwrap());
    }

    #[test]
    fn clear_empties_all_maps() {
        let cache = SchemaCache::new();
        cache.put_scheme(scheme(1, "a::A")).unwrap();
        cache.put_scheme(scheme(2, "b::B")).unwrap();
        cache.clear().unwrap();
        assert!(cache.scheme("b::B").unwrap().is_none());
    }
}

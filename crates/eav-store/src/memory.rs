//! In-memory backend for tests and embedding.
//!
//! [`InMemoryBackend`] keeps every table in `BTreeMap`s behind a `RwLock`.
//! Transactions are serialized by a single async writer lock (which subsumes
//! row-level locking), stage their writes on a private copy of the tables,
//! and publish that copy on commit. Dropping an uncommitted transaction
//! discards the copy.
//!
//! The backend enforces the constraints a relational schema would:
//! unique `(scheme_id, parent_id, name)` structures, value rows owned by
//! existing entities and structures, and the self-referencing
//! `array_parent_id` foreign key checked in batch order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use eav_types::{
    ContentHash, EntityId, PurgeTaskId, SchemeId, StructureId, TypeCatalog, TypeEntry, ValueId,
};

use crate::error::{StoreError, StoreResult};
use crate::projection::GraphProjection;
use crate::rows::{
    BackendCapabilities, ObjectRow, PurgeTaskRow, SchemeRow, StructureRow, ValueRow,
};
use crate::traits::{Backend, Transaction};

/// Row counts of committed work, for assertions in tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub commits: u64,
    pub rollbacks: u64,
    pub structures_inserted: u64,
    pub structures_updated: u64,
    pub structures_deleted: u64,
    pub objects_inserted: u64,
    pub objects_updated: u64,
    pub objects_deleted: u64,
    pub values_inserted: u64,
    pub values_updated: u64,
    pub values_deleted: u64,
}

impl StoreStats {
    fn absorb(&mut self, delta: &StoreStats) {
        self.commits += delta.commits;
        self.rollbacks += delta.rollbacks;
        self.structures_inserted += delta.structures_inserted;
        self.structures_updated += delta.structures_updated;
        self.structures_deleted += delta.structures_deleted;
        self.objects_inserted += delta.objects_inserted;
        self.objects_updated += delta.objects_updated;
        self.objects_deleted += delta.objects_deleted;
        self.values_inserted += delta.values_inserted;
        self.values_updated += delta.values_updated;
        self.values_deleted += delta.values_deleted;
    }

    /// Total value rows written or removed.
    pub fn value_writes(&self) -> u64 {
        self.values_inserted + self.values_updated + self.values_deleted
    }
}

#[derive(Clone, Debug, Default)]
struct Tables {
    types: Vec<TypeEntry>,
    schemes: BTreeMap<SchemeId, SchemeRow>,
    structures: BTreeMap<StructureId, StructureRow>,
    objects: BTreeMap<EntityId, ObjectRow>,
    values: BTreeMap<ValueId, ValueRow>,
    purge_tasks: BTreeMap<PurgeTaskId, PurgeTaskRow>,
}

impl Tables {
    fn scheme_by_name(&self, name: &str) -> Option<SchemeRow> {
        self.schemes.values().find(|s| s.name == name).cloned()
    }

    fn structures_of(&self, scheme: SchemeId) -> Vec<StructureRow> {
        self.structures
            .values()
            .filter(|s| s.scheme_id == scheme)
            .cloned()
            .collect()
    }

    fn objects(&self, ids: &[EntityId]) -> Vec<ObjectRow> {
        ids.iter()
            .filter_map(|id| self.objects.get(id))
            .cloned()
            .collect()
    }

    fn object_hashes(&self, ids: &[EntityId]) -> HashMap<EntityId, Option<ContentHash>> {
        ids.iter()
            .filter_map(|id| self.objects.get(id).map(|o| (*id, o.hash)))
            .collect()
    }

    fn values_of(&self, object_ids: &[EntityId]) -> Vec<ValueRow> {
        let wanted: HashSet<EntityId> = object_ids.iter().copied().collect();
        self.values
            .values()
            .filter(|v| wanted.contains(&v.object_id))
            .cloned()
            .collect()
    }

    fn insert_scheme(&mut self, scheme: &SchemeRow) -> StoreResult<()> {
        if self.schemes.contains_key(&scheme.id) {
            return Err(StoreError::Constraint(format!("duplicate scheme id {}", scheme.id)));
        }
        if self.scheme_by_name(&scheme.name).is_some() {
            return Err(StoreError::Constraint(format!("duplicate scheme name {}", scheme.name)));
        }
        self.schemes.insert(scheme.id, scheme.clone());
        Ok(())
    }

    fn update_scheme(&mut self, scheme: &SchemeRow) -> StoreResult<()> {
        let clash = self
            .schemes
            .values()
            .any(|s| s.name == scheme.name && s.id != scheme.id);
        if clash {
            return Err(StoreError::Constraint(format!("duplicate scheme name {}", scheme.name)));
        }
        match self.schemes.get_mut(&scheme.id) {
            Some(existing) => {
                *existing = scheme.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("scheme {}", scheme.id))),
        }
    }

    fn check_structure(&self, row: &StructureRow) -> StoreResult<()> {
        if !self.schemes.contains_key(&row.scheme_id) {
            return Err(StoreError::Constraint(format!(
                "structure {} references missing scheme {}",
                row.name, row.scheme_id
            )));
        }
        if let Some(parent) = row.parent_id {
            match self.structures.get(&parent) {
                Some(p) if p.scheme_id == row.scheme_id => {}
                _ => {
                    return Err(StoreError::Constraint(format!(
                        "structure {} references missing parent {parent}",
                        row.name
                    )))
                }
            }
        }
        let duplicate = self.structures.values().any(|s| {
            s.id != row.id
                && s.scheme_id == row.scheme_id
                && s.parent_id == row.parent_id
                && s.name == row.name
        });
        if duplicate {
            return Err(StoreError::Constraint(format!(
                "duplicate structure {} under {:?} in scheme {}",
                row.name, row.parent_id, row.scheme_id
            )));
        }
        Ok(())
    }

    fn insert_structures(&mut self, rows: &[StructureRow]) -> StoreResult<()> {
        for row in rows {
            if self.structures.contains_key(&row.id) {
                return Err(StoreError::Constraint(format!("duplicate structure id {}", row.id)));
            }
            self.check_structure(row)?;
            self.structures.insert(row.id, row.clone());
        }
        Ok(())
    }

    fn update_structures(&mut self, rows: &[StructureRow]) -> StoreResult<()> {
        for row in rows {
            if !self.structures.contains_key(&row.id) {
                return Err(StoreError::NotFound(format!("structure {}", row.id)));
            }
            self.check_structure(row)?;
            self.structures.insert(row.id, row.clone());
        }
        Ok(())
    }

    fn delete_structures(&mut self, ids: &[StructureId]) -> StoreResult<()> {
        let doomed: HashSet<StructureId> = ids.iter().copied().collect();
        if let Some(v) = self.values.values().find(|v| doomed.contains(&v.structure_id)) {
            return Err(StoreError::Constraint(format!(
                "structure {} still has value row {}",
                v.structure_id, v.id
            )));
        }
        self.structures.retain(|id, _| !doomed.contains(id));
        if let Some(orphan) = self
            .structures
            .values()
            .find(|s| s.parent_id.is_some_and(|p| doomed.contains(&p)))
        {
            return Err(StoreError::Constraint(format!(
                "structure {} would lose its parent",
                orphan.id
            )));
        }
        Ok(())
    }

    fn insert_objects(&mut self, rows: &[ObjectRow]) -> StoreResult<()> {
        for row in rows {
            if self.objects.contains_key(&row.id) {
                return Err(StoreError::Constraint(format!("duplicate object id {}", row.id)));
            }
            if !self.schemes.contains_key(&row.scheme_id) {
                return Err(StoreError::Constraint(format!(
                    "object {} references missing scheme {}",
                    row.id, row.scheme_id
                )));
            }
            self.objects.insert(row.id, row.clone());
        }
        // Parents may arrive later in the same batch.
        for row in rows {
            if let Some(parent) = row.header.parent_id {
                if !self.objects.contains_key(&parent) {
                    return Err(StoreError::Constraint(format!(
                        "object {} references missing parent {parent}",
                        row.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn update_objects(&mut self, rows: &[ObjectRow]) -> StoreResult<()> {
        for row in rows {
            match self.objects.get_mut(&row.id) {
                Some(existing) => *existing = row.clone(),
                None => return Err(StoreError::EntityNotFound(row.id)),
            }
        }
        Ok(())
    }

    fn delete_objects(&mut self, ids: &[EntityId]) -> StoreResult<()> {
        let doomed: HashSet<EntityId> = ids.iter().copied().collect();
        if let Some(v) = self.values.values().find(|v| doomed.contains(&v.object_id)) {
            return Err(StoreError::Constraint(format!(
                "object {} still owns value row {}",
                v.object_id, v.id
            )));
        }
        self.objects.retain(|id, _| !doomed.contains(id));
        if let Some(orphan) = self
            .objects
            .values()
            .find(|o| o.header.parent_id.is_some_and(|p| doomed.contains(&p)))
        {
            return Err(StoreError::Constraint(format!(
                "object {} would lose its parent",
                orphan.id
            )));
        }
        Ok(())
    }

    fn child_objects(&self, parents: &[EntityId]) -> Vec<EntityId> {
        let wanted: HashSet<EntityId> = parents.iter().copied().collect();
        self.objects
            .values()
            .filter(|o| o.header.parent_id.is_some_and(|p| wanted.contains(&p)))
            .map(|o| o.id)
            .collect()
    }

    fn insert_values(&mut self, rows: &[ValueRow]) -> StoreResult<()> {
        for row in rows {
            if self.values.contains_key(&row.id) {
                return Err(StoreError::Constraint(format!("duplicate value id {}", row.id)));
            }
            if !self.objects.contains_key(&row.object_id) {
                return Err(StoreError::Constraint(format!(
                    "value {} references missing object {}",
                    row.id, row.object_id
                )));
            }
            if !self.structures.contains_key(&row.structure_id) {
                return Err(StoreError::Constraint(format!(
                    "value {} references missing structure {}",
                    row.id, row.structure_id
                )));
            }
            if let Some(parent) = row.array_parent_id {
                if !self.values.contains_key(&parent) {
                    return Err(StoreError::Constraint(format!(
                        "value {} inserted before its container {parent}",
                        row.id
                    )));
                }
            }
            self.values.insert(row.id, row.clone());
        }
        Ok(())
    }

    fn update_values(&mut self, rows: &[ValueRow]) -> StoreResult<()> {
        for row in rows {
            if let Some(parent) = row.array_parent_id {
                if !self.values.contains_key(&parent) {
                    return Err(StoreError::Constraint(format!(
                        "value {} references missing container {parent}",
                        row.id
                    )));
                }
            }
            match self.values.get_mut(&row.id) {
                Some(existing) => *existing = row.clone(),
                None => return Err(StoreError::NotFound(format!("value {}", row.id))),
            }
        }
        Ok(())
    }

    fn remove_values_where(&mut self, doomed: impl Fn(&ValueRow) -> bool) -> StoreResult<u64> {
        let removed: HashSet<ValueId> = self
            .values
            .values()
            .filter(|v| doomed(v))
            .map(|v| v.id)
            .collect();
        self.values.retain(|id, _| !removed.contains(id));
        if let Some(orphan) = self
            .values
            .values()
            .find(|v| v.array_parent_id.is_some_and(|p| removed.contains(&p)))
        {
            return Err(StoreError::Constraint(format!(
                "value {} would lose its container",
                orphan.id
            )));
        }
        Ok(removed.len() as u64)
    }

    fn project(&self, id: EntityId, visited: &mut HashSet<EntityId>) -> Option<GraphProjection> {
        let object = self.objects.get(&id)?.clone();
        visited.insert(id);
        let values = self.values_of(&[id]);
        let mut references = Vec::new();
        for target in values.iter().filter_map(ValueRow::referenced_object) {
            if visited.contains(&target) {
                continue;
            }
            if let Some(projection) = self.project(target, visited) {
                references.push(projection);
            }
        }
        Some(GraphProjection {
            object,
            values,
            references,
        })
    }
}

struct Shared {
    tables: RwLock<Tables>,
    writer: Arc<AsyncMutex<()>>,
    next_id: AtomicI64,
    stats: Mutex<StoreStats>,
    capabilities: BackendCapabilities,
}

/// In-memory relational backend.
///
/// Cloning yields another handle to the same tables.
#[derive(Clone)]
pub struct InMemoryBackend {
    shared: Arc<Shared>,
}

impl InMemoryBackend {
    /// A fresh store seeded with the builtin type catalog.
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities::default())
    }

    /// A fresh store advertising the given capabilities.
    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        let tables = Tables {
            types: TypeCatalog::builtin_entries(),
            ..Tables::default()
        };
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(tables),
                writer: Arc::new(AsyncMutex::new(())),
                next_id: AtomicI64::new(1),
                stats: Mutex::new(StoreStats::default()),
                capabilities,
            }),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.shared
            .tables
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Counters of committed work since creation or the last reset.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        self.shared
            .stats
            .lock()
            .map(|s| *s)
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Zero the counters.
    pub fn reset_stats(&self) -> StoreResult<()> {
        let mut stats = self
            .shared
            .stats
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        *stats = StoreStats::default();
        Ok(())
    }

    /// Number of committed entity rows.
    pub fn object_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.objects.len())
    }

    /// Number of committed value rows.
    pub fn value_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.values.len())
    }

    /// Number of committed schemes.
    pub fn scheme_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.schemes.len())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (objects, values) = self
            .read()
            .map(|t| (t.objects.len(), t.values.len()))
            .unwrap_or_default();
        f.debug_struct("InMemoryBackend")
            .field("object_count", &objects)
            .field("value_count", &values)
            .finish()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.shared.capabilities
    }

    async fn load_types(&self) -> StoreResult<Vec<TypeEntry>> {
        Ok(self.read()?.types.clone())
    }

    async fn scheme_by_name(&self, name: &str) -> StoreResult<Option<SchemeRow>> {
        Ok(self.read()?.scheme_by_name(name))
    }

    async fn scheme(&self, id: SchemeId) -> StoreResult<Option<SchemeRow>> {
        Ok(self.read()?.schemes.get(&id).cloned())
    }

    async fn structures(&self, scheme: SchemeId) -> StoreResult<Vec<StructureRow>> {
        Ok(self.read()?.structures_of(scheme))
    }

    async fn objects(&self, ids: &[EntityId]) -> StoreResult<Vec<ObjectRow>> {
        Ok(self.read()?.objects(ids))
    }

    async fn object_hashes(
        &self,
        ids: &[EntityId],
    ) -> StoreResult<HashMap<EntityId, Option<ContentHash>>> {
        Ok(self.read()?.object_hashes(ids))
    }

    async fn values(&self, object_ids: &[EntityId]) -> StoreResult<Vec<ValueRow>> {
        Ok(self.read()?.values_of(object_ids))
    }

    async fn load_graph(&self, id: EntityId) -> StoreResult<Option<serde_json::Value>> {
        if !self.shared.capabilities.graph_projection {
            return Err(StoreError::Unsupported("graph projection".into()));
        }
        let projection = self.read()?.project(id, &mut HashSet::new());
        projection.map(|p| p.to_json()).transpose()
    }

    async fn next_ids(&self, count: usize) -> StoreResult<Vec<i64>> {
        let start = self
            .shared
            .next_id
            .fetch_add(count as i64, Ordering::SeqCst);
        Ok((start..start + count as i64).collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.shared.writer).lock_owned().await;
        let staged = self.read()?.clone();
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            staged,
            delta: StoreStats::default(),
            _guard: guard,
        }))
    }

    async fn purge_task(&self, id: PurgeTaskId) -> StoreResult<Option<PurgeTaskRow>> {
        Ok(self.read()?.purge_tasks.get(&id).cloned())
    }

    async fn purge_tasks(&self) -> StoreResult<Vec<PurgeTaskRow>> {
        Ok(self.read()?.purge_tasks.values().cloned().collect())
    }
}

/// A staged unit of work against an [`InMemoryBackend`].
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    staged: Tables,
    delta: StoreStats,
    _guard: OwnedMutexGuard<()>,
}

impl InMemoryTransaction {
    fn require_change_tracking(&self, op: &str) -> StoreResult<()> {
        if self.shared.capabilities.change_tracking {
            Ok(())
        } else {
            Err(StoreError::Unsupported(op.to_string()))
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn lock_objects(&mut self, ids: &[EntityId]) -> StoreResult<Vec<ObjectRow>> {
        // The writer lock held since `begin` already excludes other writers.
        Ok(self.staged.objects(ids))
    }

    async fn scheme_by_name(&mut self, name: &str) -> StoreResult<Option<SchemeRow>> {
        Ok(self.staged.scheme_by_name(name))
    }

    async fn insert_scheme(&mut self, scheme: &SchemeRow) -> StoreResult<()> {
        self.staged.insert_scheme(scheme)
    }

    async fn update_scheme(&mut self, scheme: &SchemeRow) -> StoreResult<()> {
        self.staged.update_scheme(scheme)
    }

    async fn structures(&mut self, scheme: SchemeId) -> StoreResult<Vec<StructureRow>> {
        Ok(self.staged.structures_of(scheme))
    }

    async fn insert_structures(&mut self, rows: &[StructureRow]) -> StoreResult<()> {
        self.staged.insert_structures(rows)?;
        self.delta.structures_inserted += rows.len() as u64;
        Ok(())
    }

    async fn update_structures(&mut self, rows: &[StructureRow]) -> StoreResult<()> {
        self.staged.update_structures(rows)?;
        self.delta.structures_updated += rows.len() as u64;
        Ok(())
    }

    async fn delete_structures(&mut self, ids: &[StructureId]) -> StoreResult<()> {
        self.staged.delete_structures(ids)?;
        self.delta.structures_deleted += ids.len() as u64;
        Ok(())
    }

    async fn object_hashes(
        &mut self,
        ids: &[EntityId],
    ) -> StoreResult<HashMap<EntityId, Option<ContentHash>>> {
        Ok(self.staged.object_hashes(ids))
    }

    async fn insert_objects(&mut self, rows: &[ObjectRow]) -> StoreResult<()> {
        self.staged.insert_objects(rows)?;
        self.delta.objects_inserted += rows.len() as u64;
        Ok(())
    }

    async fn update_objects(&mut self, rows: &[ObjectRow]) -> StoreResult<()> {
        self.staged.update_objects(rows)?;
        self.delta.objects_updated += rows.len() as u64;
        Ok(())
    }

    async fn delete_objects(&mut self, ids: &[EntityId]) -> StoreResult<()> {
        let before = self.staged.objects.len();
        self.staged.delete_objects(ids)?;
        self.delta.objects_deleted += (before - self.staged.objects.len()) as u64;
        Ok(())
    }

    async fn child_objects(&mut self, parents: &[EntityId]) -> StoreResult<Vec<EntityId>> {
        Ok(self.staged.child_objects(parents))
    }

    async fn values(&mut self, object_ids: &[EntityId]) -> StoreResult<Vec<ValueRow>> {
        self.require_change_tracking("value reads inside a transaction")?;
        Ok(self.staged.values_of(object_ids))
    }

    async fn insert_values(&mut self, rows: &[ValueRow]) -> StoreResult<()> {
        self.staged.insert_values(rows)?;
        self.delta.values_inserted += rows.len() as u64;
        Ok(())
    }

    async fn update_values(&mut self, rows: &[ValueRow]) -> StoreResult<()> {
        self.require_change_tracking("value updates")?;
        self.staged.update_values(rows)?;
        self.delta.values_updated += rows.len() as u64;
        Ok(())
    }

    async fn delete_values(&mut self, ids: &[ValueId]) -> StoreResult<()> {
        let doomed: HashSet<ValueId> = ids.iter().copied().collect();
        let removed = self.staged.remove_values_where(|v| doomed.contains(&v.id))?;
        self.delta.values_deleted += removed;
        Ok(())
    }

    async fn delete_object_values(&mut self, object_ids: &[EntityId]) -> StoreResult<u64> {
        let owners: HashSet<EntityId> = object_ids.iter().copied().collect();
        let removed = self
            .staged
            .remove_values_where(|v| owners.contains(&v.object_id))?;
        self.delta.values_deleted += removed;
        Ok(removed)
    }

    async fn delete_structure_values(
        &mut self,
        structure_ids: &[StructureId],
    ) -> StoreResult<u64> {
        let bound: HashSet<StructureId> = structure_ids.iter().copied().collect();
        let removed = self
            .staged
            .remove_values_where(|v| bound.contains(&v.structure_id))?;
        self.delta.values_deleted += removed;
        Ok(removed)
    }

    async fn purge_task(&mut self, id: PurgeTaskId) -> StoreResult<Option<PurgeTaskRow>> {
        Ok(self.staged.purge_tasks.get(&id).cloned())
    }

    async fn insert_purge_task(&mut self, task: &PurgeTaskRow) -> StoreResult<()> {
        if self.staged.purge_tasks.contains_key(&task.id) {
            return Err(StoreError::Constraint(format!("duplicate purge task {}", task.id)));
        }
        self.staged.purge_tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_purge_task(&mut self, task: &PurgeTaskRow) -> StoreResult<()> {
        match self.staged.purge_tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("purge task {}", task.id))),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        {
            let mut tables = this
                .shared
                .tables
                .write()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            *tables = this.staged;
        }
        let mut stats = this
            .shared
            .stats
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let mut delta = this.delta;
        delta.commits = 1;
        stats.absorb(&delta);
        debug!(
            values_inserted = delta.values_inserted,
            values_updated = delta.values_updated,
            values_deleted = delta.values_deleted,
            "transaction committed"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut stats = self
            .shared
            .stats
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        stats.rollbacks += 1;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{CollectionKind, SchemeKind, ValueData};
    use eav_types::{EntityHeader, StorageTypeId};

    fn scheme(id: i64, name: &str) -> SchemeRow {
        SchemeRow {
            id: SchemeId::new(id),
            name: name.into(),
            alias: None,
            kind: SchemeKind::Object,
            structure_hash: None,
        }
    }

    fn structure(id: i64, scheme: i64, parent: Option<i64>, name: &str) -> StructureRow {
        StructureRow {
            id: StructureId::new(id),
            scheme_id: SchemeId::new(scheme),
            parent_id: parent.map(StructureId::new),
            name: name.into(),
            alias: None,
            type_id: StorageTypeId::new(1),
            required: false,
            collection: CollectionKind::None,
            key_type: None,
            store_null: false,
            order: 0,
        }
    }

    fn object(id: i64, scheme: i64) -> ObjectRow {
        ObjectRow {
            id: EntityId::new(id),
            scheme_id: SchemeId::new(scheme),
            hash: Some(ContentHash::from_bytes(&id.to_le_bytes())),
            header: EntityHeader::default(),
        }
    }

    fn value(id: i64, object: i64, data: ValueData, parent: Option<i64>) -> ValueRow {
        ValueRow {
            id: ValueId::new(id),
            object_id: EntityId::new(object),
            structure_id: StructureId::new(10),
            data,
            hash: None,
            array_parent_id: parent.map(ValueId::new),
            array_index: None,
        }
    }

    async fn seeded() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        tx.insert_scheme(&scheme(1, "shop::Order")).await.unwrap();
        tx.insert_structures(&[structure(10, 1, None, "Lines")])
            .await
            .unwrap();
        tx.insert_objects(&[object(100, 1), object(101, 1)])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        backend
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let backend = seeded().await;
        assert_eq!(backend.object_count().unwrap(), 2);
        let found = backend.scheme_by_name("shop::Order").await.unwrap();
        assert_eq!(found.unwrap().id, SchemeId::new(1));
        assert_eq!(backend.stats().unwrap().commits, 1);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let backend = seeded().await;
        {
            let mut tx = backend.begin().await.unwrap();
            tx.insert_objects(&[object(102, 1)]).await.unwrap();
        }
        assert_eq!(backend.object_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn explicit_rollback_is_counted() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        tx.insert_objects(&[object(102, 1)]).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(backend.object_count().unwrap(), 2);
        assert_eq!(backend.stats().unwrap().rollbacks, 1);
    }

    #[tokio::test]
    async fn container_must_precede_elements() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        let out_of_order = [
            value(2, 100, ValueData::Long(1), Some(1)),
            value(1, 100, ValueData::Container, None),
        ];
        let err = tx.insert_values(&out_of_order).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn in_order_batch_is_accepted() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        tx.insert_values(&[
            value(1, 100, ValueData::Container, None),
            value(2, 100, ValueData::Long(1), Some(1)),
        ])
        .await
        .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(backend.value_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn deleting_container_alone_is_rejected() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        tx.insert_values(&[
            value(1, 100, ValueData::Container, None),
            value(2, 100, ValueData::Long(1), Some(1)),
        ])
        .await
        .unwrap();
        let err = tx.delete_values(&[ValueId::new(1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn duplicate_structure_name_rejected() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        let err = tx
            .insert_structures(&[structure(11, 1, None, "Lines")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn same_name_under_different_parent_is_allowed() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        tx.insert_structures(&[structure(11, 1, Some(10), "Lines")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lock_returns_existing_rows_only() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        let rows = tx
            .lock_objects(&[EntityId::new(100), EntityId::new(999)])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, EntityId::new(100));
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let backend = InMemoryBackend::new();
        let a = backend.next_ids(3).await.unwrap();
        let b = backend.next_id().await.unwrap();
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, 4);
    }

    #[tokio::test]
    async fn graph_projection_nests_references_once() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        // 100 -> 101 and 101 -> 100: the cycle is emitted once.
        tx.insert_values(&[
            value(1, 100, ValueData::Object(EntityId::new(101)), None),
            value(2, 101, ValueData::Object(EntityId::new(100)), None),
        ])
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let payload = backend.load_graph(EntityId::new(100)).await.unwrap().unwrap();
        let graph = GraphProjection::from_json(payload).unwrap();
        assert_eq!(graph.object.id, EntityId::new(100));
        assert_eq!(graph.references.len(), 1);
        assert_eq!(graph.references[0].object.id, EntityId::new(101));
        assert!(graph.references[0].references.is_empty());
        assert_eq!(graph.flatten().len(), 2);
    }

    #[tokio::test]
    async fn missing_capabilities_are_reported() {
        let backend = InMemoryBackend::with_capabilities(BackendCapabilities {
            change_tracking: false,
            graph_projection: false,
        });
        let err = backend.load_graph(EntityId::new(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
        let mut tx = backend.begin().await.unwrap();
        let err = tx.values(&[EntityId::new(1)]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[tokio::test]
    async fn object_with_values_cannot_be_deleted() {
        let backend = seeded().await;
        let mut tx = backend.begin().await.unwrap();
        tx.insert_values(&[value(1, 100, ValueData::Long(1), None)])
            .await
            .unwrap();
        let err = tx.delete_objects(&[EntityId::new(100)]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        tx.delete_object_values(&[EntityId::new(100)]).await.unwrap();
        tx.delete_objects(&[EntityId::new(100)]).await.unwrap();
    }

    #[tokio::test]
    async fn transactions_are_serialized() {
        let backend = seeded().await;
        let tx = backend.begin().await.unwrap();
        let other = backend.clone();
        let waiter = tokio::spawn(async move {
            let tx = other.begin().await.unwrap();
            tx.commit().await.unwrap();
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        tx.commit().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(backend.stats().unwrap().commits, 3);
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use eav_types::{
    ContentHash, EntityId, PurgeTaskId, SchemeId, StructureId, TypeEntry, ValueId,
};

use crate::error::{StoreError, StoreResult};
use crate::rows::{
    BackendCapabilities, ObjectRow, PurgeTaskRow, SchemeRow, StructureRow, ValueRow,
};

/// Read side of a relational backend plus transaction and id allocation.
///
/// All implementations must satisfy these invariants:
/// - Ids returned by [`Backend::next_ids`] are unique and strictly increasing
///   across all tables.
/// - A [`Transaction`] is atomic: either every write becomes visible on
///   commit or none does.
/// - Reads outside a transaction observe only committed data.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Optional features this backend provides.
    fn capabilities(&self) -> BackendCapabilities;

    /// Rows of the `types` table.
    async fn load_types(&self) -> StoreResult<Vec<TypeEntry>>;

    /// Look up a scheme by name.
    async fn scheme_by_name(&self, name: &str) -> StoreResult<Option<SchemeRow>>;

    /// Look up a scheme by id.
    async fn scheme(&self, id: SchemeId) -> StoreResult<Option<SchemeRow>>;

    /// All structures of a scheme.
    async fn structures(&self, scheme: SchemeId) -> StoreResult<Vec<StructureRow>>;

    /// Entity rows for the given ids. Missing ids are omitted.
    async fn objects(&self, ids: &[EntityId]) -> StoreResult<Vec<ObjectRow>>;

    /// Current content hashes. Missing ids are omitted; entities that were
    /// never hashed map to `None`.
    async fn object_hashes(
        &self,
        ids: &[EntityId],
    ) -> StoreResult<HashMap<EntityId, Option<ContentHash>>>;

    /// Value rows owned by the given entities.
    async fn values(&self, object_ids: &[EntityId]) -> StoreResult<Vec<ValueRow>>;

    /// Server-side projection of the nested graph rooted at `id`, as a
    /// structured payload decodable into
    /// [`GraphProjection`](crate::projection::GraphProjection).
    async fn load_graph(&self, id: EntityId) -> StoreResult<Option<serde_json::Value>>;

    /// Allocate one id.
    async fn next_id(&self) -> StoreResult<i64> {
        first_id(self.next_ids(1).await?)
    }

    /// Allocate `count` ids.
    async fn next_ids(&self, count: usize) -> StoreResult<Vec<i64>>;

    /// Begin a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;

    /// A purge task by id.
    async fn purge_task(&self, id: PurgeTaskId) -> StoreResult<Option<PurgeTaskRow>>;

    /// All purge tasks.
    async fn purge_tasks(&self) -> StoreResult<Vec<PurgeTaskRow>>;
}

/// Write boundary: one atomic unit of work.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it
/// back.
#[async_trait]
pub trait Transaction: Send {
    /// Row-lock the given entities ("select for update") and return the rows
    /// that exist.
    async fn lock_objects(&mut self, ids: &[EntityId]) -> StoreResult<Vec<ObjectRow>>;

    async fn scheme_by_name(&mut self, name: &str) -> StoreResult<Option<SchemeRow>>;
    async fn insert_scheme(&mut self, scheme: &SchemeRow) -> StoreResult<()>;
    async fn update_scheme(&mut self, scheme: &SchemeRow) -> StoreResult<()>;

    async fn structures(&mut self, scheme: SchemeId) -> StoreResult<Vec<StructureRow>>;
    async fn insert_structures(&mut self, rows: &[StructureRow]) -> StoreResult<()>;
    async fn update_structures(&mut self, rows: &[StructureRow]) -> StoreResult<()>;
    async fn delete_structures(&mut self, ids: &[StructureId]) -> StoreResult<()>;

    async fn object_hashes(
        &mut self,
        ids: &[EntityId],
    ) -> StoreResult<HashMap<EntityId, Option<ContentHash>>>;
    async fn insert_objects(&mut self, rows: &[ObjectRow]) -> StoreResult<()>;
    async fn update_objects(&mut self, rows: &[ObjectRow]) -> StoreResult<()>;
    async fn delete_objects(&mut self, ids: &[EntityId]) -> StoreResult<()>;
    /// Direct children in the hierarchical object tree.
    async fn child_objects(&mut self, parents: &[EntityId]) -> StoreResult<Vec<EntityId>>;

    async fn values(&mut self, object_ids: &[EntityId]) -> StoreResult<Vec<ValueRow>>;
    /// Bulk insert. Every `array_parent_id` must refer to a row that already
    /// exists or appears earlier in `rows`.
    async fn insert_values(&mut self, rows: &[ValueRow]) -> StoreResult<()>;
    async fn update_values(&mut self, rows: &[ValueRow]) -> StoreResult<()>;
    async fn delete_values(&mut self, ids: &[ValueId]) -> StoreResult<()>;
    /// Delete every value row owned by the given entities; returns the count.
    async fn delete_object_values(&mut self, object_ids: &[EntityId]) -> StoreResult<u64>;
    /// Delete every value row bound to the given structures; returns the count.
    async fn delete_structure_values(&mut self, structure_ids: &[StructureId])
        -> StoreResult<u64>;

    async fn purge_task(&mut self, id: PurgeTaskId) -> StoreResult<Option<PurgeTaskRow>>;
    async fn insert_purge_task(&mut self, task: &PurgeTaskRow) -> StoreResult<()>;
    async fn update_purge_task(&mut self, task: &PurgeTaskRow) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

fn first_id(ids: Vec<i64>) -> StoreResult<i64> {
    ids.into_iter().next().ok_or(StoreError::IdsExhausted(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allocation_is_an_error() {
        assert!(matches!(first_id(Vec::new()), Err(StoreError::IdsExhausted(1))));
        assert_eq!(first_id(vec![7, 8]).unwrap(), 7);
    }
}

use std::sync::Arc;

use tokio::sync::OnceCell;

use eav_store::ObjectRow;
use eav_types::{ContentHash, Entity, EntityHeader, EntityId, Persist, Record, TypeRef};

use crate::engine::Engine;
use crate::error::EngineResult;

/// An entity whose payload is read on first access.
///
/// The entity row is available immediately. [`LazyEntity::props`] performs
/// its own read, decodes the payload and primes the props cache; only the
/// materialized entity is ever cached.
pub struct LazyEntity {
    engine: Engine,
    id: EntityId,
    type_ref: TypeRef,
    header: EntityHeader,
    hash: Option<ContentHash>,
    cell: OnceCell<Arc<Entity>>,
}

impl LazyEntity {
    pub(crate) fn pending(engine: Engine, row: ObjectRow, type_ref: TypeRef) -> Self {
        Self {
            engine,
            id: row.id,
            type_ref,
            header: row.header,
            hash: row.hash,
            cell: OnceCell::new(),
        }
    }

    pub(crate) fn ready(engine: Engine, id: EntityId, entity: Arc<Entity>) -> Self {
        Self {
            engine,
            id,
            type_ref: entity.type_ref,
            header: entity.header.clone(),
            hash: entity.hash,
            cell: OnceCell::new_with(Some(entity)),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn type_ref(&self) -> TypeRef {
        self.type_ref
    }

    pub fn header(&self) -> &EntityHeader {
        &self.header
    }

    /// Hash of the entity row as first read.
    pub fn hash(&self) -> Option<ContentHash> {
        self.hash
    }

    pub fn is_materialized(&self) -> bool {
        self.cell.initialized()
    }

    /// The full entity. Concurrent callers share one read.
    pub async fn entity(&self) -> EngineResult<&Arc<Entity>> {
        self.cell
            .get_or_try_init(|| self.engine.materialize(self.id))
            .await
    }

    pub async fn props(&self) -> EngineResult<&Record> {
        Ok(&self.entity().await?.props)
    }

    pub async fn to_typed<T: Persist>(&self) -> EngineResult<T> {
        Ok(self.entity().await?.to_typed::<T>()?)
    }
}

impl std::fmt::Debug for LazyEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyEntity")
            .field("id", &self.id)
            .field("type_ref", &self.type_ref)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

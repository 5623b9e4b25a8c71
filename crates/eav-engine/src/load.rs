//! The load path.
//!
//! Every load consults the props cache first. A cached copy is returned as
//! is when [`EngineConfig::trust_cache`](crate::EngineConfig::trust_cache)
//! is set; otherwise its hash is compared with the backend's and a mismatch
//! or a vanished entity evicts it.
//!
//! Eager loads fetch the whole reachable graph, embed referenced entities
//! into their referrers (each entity once; later references stay ids) and
//! cache every entity of the result. Lazy loads fetch only the entity row
//! and defer the payload to [`LazyEntity`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use eav_graph::{collect, decode_record, for_each_ref_mut, GraphResult};
use eav_store::{GraphProjection, ObjectRow, ValueRow};
use eav_types::{Entity, EntityId, EntityRef, Persist};

use crate::config::LoadMode;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::lazy::LazyEntity;
use crate::save::group_by_object;

/// Result of [`Engine::load`], shaped by the configured load mode.
#[derive(Debug)]
pub enum Loaded {
    Eager(Arc<Entity>),
    Lazy(LazyEntity),
}

impl Loaded {
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Eager(entity) => entity.id,
            Self::Lazy(lazy) => Some(lazy.id()),
        }
    }

    /// The materialized entity, loading the payload if still deferred.
    pub async fn entity(&self) -> EngineResult<Arc<Entity>> {
        match self {
            Self::Eager(entity) => Ok(Arc::clone(entity)),
            Self::Lazy(lazy) => lazy.entity().await.map(Arc::clone),
        }
    }
}

impl Engine {
    /// Load an entity in the configured mode. `None` if it does not exist.
    pub async fn load(&self, id: EntityId) -> EngineResult<Option<Loaded>> {
        Ok(match self.inner.config.load_mode {
            LoadMode::Eager => self.load_eager(id).await?.map(Loaded::Eager),
            LoadMode::Lazy => self.load_lazy(id).await?.map(Loaded::Lazy),
        })
    }

    /// Load an entity as `T`, registering the type first.
    pub async fn load_typed<T: Persist>(&self, id: EntityId) -> EngineResult<Option<T>> {
        self.register::<T>()?;
        match self.load(id).await? {
            Some(loaded) => Ok(Some(loaded.entity().await?.to_typed::<T>()?)),
            None => Ok(None),
        }
    }

    /// Load an entity with its whole reachable graph.
    pub async fn load_eager(&self, id: EntityId) -> EngineResult<Option<Arc<Entity>>> {
        if let Some(hit) = self.cached(id).await? {
            return Ok(Some(hit));
        }
        let nodes = self.fetch_graph(id).await?;
        let mut decoded = HashMap::with_capacity(nodes.len());
        for (row, values) in nodes {
            let entity_id = row.id;
            decoded.insert(entity_id, self.decode(row, &values).await?);
        }
        let Some(root) = assemble(id, &decoded, &mut HashSet::new())? else {
            return Ok(None);
        };

        let domain = &self.inner.config.cache_domain;
        for nested in collect(&root).into_iter().skip(1) {
            self.inner.cache.put(domain, nested.clone())?;
        }
        debug!(id = %id, entities = decoded.len(), "eager load");
        Ok(Some(self.inner.cache.put(domain, root)?))
    }

    /// Load an entity row now and its payload on first access.
    pub async fn load_lazy(&self, id: EntityId) -> EngineResult<Option<LazyEntity>> {
        if let Some(hit) = self.cached(id).await? {
            return Ok(Some(LazyEntity::ready(self.clone(), id, hit)));
        }
        let Some(row) = self.inner.backend.objects(&[id]).await?.into_iter().next() else {
            return Ok(None);
        };
        let (type_ref, _) = self.resolve_scheme(row.scheme_id).await?;
        Ok(Some(LazyEntity::pending(self.clone(), row, type_ref)))
    }

    /// Read and decode one entity's payload and cache the result.
    pub(crate) async fn materialize(&self, id: EntityId) -> EngineResult<Arc<Entity>> {
        let row = self
            .inner
            .backend
            .objects(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or(EngineError::NotFound(id))?;
        let values = self.inner.backend.values(&[id]).await?;
        let entity = self.decode(row, &values).await?;
        debug!(id = %id, values = values.len(), "materialized lazy entity");
        Ok(self.inner.cache.put(&self.inner.config.cache_domain, entity)?)
    }

    /// A usable cached copy, or `None`.
    pub(crate) async fn cached(&self, id: EntityId) -> EngineResult<Option<Arc<Entity>>> {
        let domain = &self.inner.config.cache_domain;
        let Some(hit) = self.inner.cache.get(domain, id)? else {
            return Ok(None);
        };
        if self.inner.config.trust_cache {
            return Ok(Some(hit.entity));
        }
        let current = self.inner.backend.object_hashes(&[id]).await?;
        match current.get(&id) {
            Some(hash) if hit.is_current(*hash) => Ok(Some(hit.entity)),
            _ => {
                debug!(id = %id, "evicting stale cache entry");
                self.inner.cache.invalidate(domain, id)?;
                Ok(None)
            }
        }
    }

    async fn decode(&self, row: ObjectRow, values: &[ValueRow]) -> EngineResult<Entity> {
        let (type_ref, tree) = self.resolve_scheme(row.scheme_id).await?;
        let props = decode_record(values, &tree)?;
        Ok(Entity {
            id: Some(row.id),
            type_ref,
            scheme_id: Some(row.scheme_id),
            header: row.header,
            hash: row.hash,
            props,
        })
    }

    /// Entity rows and value rows of the graph reachable from `id`.
    async fn fetch_graph(&self, id: EntityId) -> EngineResult<Vec<(ObjectRow, Vec<ValueRow>)>> {
        let backend = &self.inner.backend;
        if backend.capabilities().graph_projection {
            let Some(payload) = backend.load_graph(id).await? else {
                return Ok(Vec::new());
            };
            let projection = GraphProjection::from_json(payload)?;
            return Ok(projection
                .flatten()
                .into_iter()
                .map(|p| (p.object.clone(), p.values.clone()))
                .collect());
        }

        debug!(id = %id, "no graph projection, following references");
        let mut out = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut frontier = vec![id];
        while !frontier.is_empty() {
            let rows = backend.objects(&frontier).await?;
            let mut values = group_by_object(backend.values(&frontier).await?);
            let mut next = Vec::new();
            for row in rows {
                let own = values.remove(&row.id).unwrap_or_default();
                next.extend(
                    own.iter()
                        .filter_map(ValueRow::referenced_object)
                        .filter(|target| seen.insert(*target)),
                );
                out.push((row, own));
            }
            frontier = next;
        }
        Ok(out)
    }
}

/// Embed referenced entities, pre-order. An entity already placed anywhere
/// in the result stays a plain id reference.
fn assemble(
    id: EntityId,
    decoded: &HashMap<EntityId, Entity>,
    placed: &mut HashSet<EntityId>,
) -> GraphResult<Option<Entity>> {
    let Some(entity) = decoded.get(&id) else {
        return Ok(None);
    };
    let mut entity = entity.clone();
    placed.insert(id);
    for_each_ref_mut(&mut entity.props, &mut |r| {
        if let EntityRef::Id(target) = *r {
            if !placed.contains(&target) {
                if let Some(nested) = assemble(target, decoded, placed)? {
                    *r = EntityRef::to(nested);
                }
            }
        }
        Ok(())
    })?;
    Ok(Some(entity))
}

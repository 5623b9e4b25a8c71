//! The engine handle and its construction.

use std::sync::Arc;

use tracing::{debug, info};

use eav_cache::PropsCache;
use eav_hash::HashCalculator;
use eav_schema::{SchemaCache, SchemaSynchronizer, StructureTree, SyncOutcome, TypeMigrationHook};
use eav_store::{Backend, SchemeRow};
use eav_types::{EntityId, Persist, SchemeId, TypeCatalog, TypeRef};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::registry::TypeRegistry;

pub(crate) struct EngineInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: EngineConfig,
    pub(crate) cache: Arc<PropsCache>,
    pub(crate) schema: SchemaSynchronizer,
    pub(crate) registry: TypeRegistry,
    pub(crate) calc: HashCalculator,
}

/// Persists and loads entity graphs against one backend.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    backend: Arc<dyn Backend>,
    config: EngineConfig,
    cache: Option<Arc<PropsCache>>,
    schema_cache: Option<Arc<SchemaCache>>,
    migration: Option<Arc<dyn TypeMigrationHook>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a props cache with other engines. Entries stay separated by
    /// [`EngineConfig::cache_domain`].
    pub fn cache(mut self, cache: Arc<PropsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.schema_cache = Some(cache);
        self
    }

    pub fn migration(mut self, hook: Arc<dyn TypeMigrationHook>) -> Self {
        self.migration = Some(hook);
        self
    }

    /// Read the backend's type catalog and assemble the engine.
    pub async fn build(self) -> EngineResult<Engine> {
        self.config.validate()?;
        let catalog = Arc::new(TypeCatalog::from_entries(self.backend.load_types().await?)?);
        let schema_cache = self.schema_cache.unwrap_or_default();
        let mut schema =
            SchemaSynchronizer::new(catalog, schema_cache, self.config.sync_options());
        if let Some(hook) = self.migration {
            schema = schema.with_migration(hook);
        }
        info!(
            domain = %self.config.cache_domain,
            strategy = ?self.config.strategy,
            load_mode = ?self.config.load_mode,
            "engine ready"
        );
        Ok(Engine {
            inner: Arc::new(EngineInner {
                backend: self.backend,
                config: self.config,
                cache: self.cache.unwrap_or_default(),
                schema,
                registry: TypeRegistry::new(),
                calc: HashCalculator::new(),
            }),
        })
    }
}

impl Engine {
    pub fn builder(backend: Arc<dyn Backend>) -> EngineBuilder {
        EngineBuilder {
            backend,
            config: EngineConfig::default(),
            cache: None,
            schema_cache: None,
            migration: None,
        }
    }

    /// An engine with its own caches.
    pub async fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> EngineResult<Self> {
        Self::builder(backend).config(config).build().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn cache(&self) -> &Arc<PropsCache> {
        &self.inner.cache
    }

    pub fn schema(&self) -> &SchemaSynchronizer {
        &self.inner.schema
    }

    // ---- Types and schemes ----

    /// Make `T` loadable. Saved types are registered implicitly.
    pub fn register<T: Persist>(&self) -> EngineResult<()> {
        self.register_type(TypeRef::of::<T>())
    }

    pub fn register_type(&self, type_ref: TypeRef) -> EngineResult<()> {
        if self.inner.registry.register(type_ref)? {
            debug!(type_name = type_ref.name(), "registered type");
        }
        Ok(())
    }

    /// Register `T` and reconcile its scheme with the backend.
    pub async fn sync_scheme<T: Persist>(&self) -> EngineResult<SyncOutcome> {
        self.sync_type(TypeRef::of::<T>()).await
    }

    pub async fn sync_type(&self, type_ref: TypeRef) -> EngineResult<SyncOutcome> {
        self.register_type(type_ref)?;
        let descriptor = type_ref.descriptor();
        Ok(self
            .inner
            .schema
            .sync(self.inner.backend.as_ref(), &descriptor)
            .await?)
    }

    /// Scheme and tree of a type, synchronizing on first use.
    pub(crate) async fn ensure_scheme(
        &self,
        type_ref: TypeRef,
    ) -> EngineResult<(SchemeRow, Arc<StructureTree>)> {
        self.register_type(type_ref)?;
        Ok(self
            .inner
            .schema
            .ensure(self.inner.backend.as_ref(), type_ref)
            .await?)
    }

    /// The registered type and current tree behind a stored scheme id.
    pub(crate) async fn resolve_scheme(
        &self,
        scheme: SchemeId,
    ) -> EngineResult<(TypeRef, Arc<StructureTree>)> {
        let row = self
            .inner
            .schema
            .scheme(self.inner.backend.as_ref(), scheme)
            .await?;
        let type_ref = self.inner.registry.resolve(&row.name)?;
        let (_, tree) = self.ensure_scheme(type_ref).await?;
        Ok((type_ref, tree))
    }

    // ---- Delete ----

    /// Remove one entity's values and row and evict it from the cache.
    /// Returns `false` if it did not exist.
    ///
    /// Fails with [`EngineError::HasChildren`] while other objects name it as
    /// their parent; delete such subtrees with
    /// [`mark_for_deletion`](Engine::mark_for_deletion) and
    /// [`purge`](Engine::purge).
    pub async fn delete(&self, id: EntityId) -> EngineResult<bool> {
        let domain = &self.inner.config.cache_domain;
        let mut tx = self.inner.backend.begin().await?;
        if tx.lock_objects(&[id]).await?.is_empty() {
            tx.rollback().await?;
            self.inner.cache.invalidate(domain, id)?;
            return Ok(false);
        }
        let children = tx.child_objects(&[id]).await?;
        if !children.is_empty() {
            tx.rollback().await?;
            return Err(EngineError::HasChildren {
                id,
                children: children.len(),
            });
        }
        let values = tx.delete_object_values(&[id]).await?;
        tx.delete_objects(&[id]).await?;
        tx.commit().await?;
        self.inner.cache.invalidate(domain, id)?;
        debug!(id = %id, values, "deleted entity");
        Ok(true)
    }
}

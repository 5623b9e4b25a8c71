//! Schema synchronization.
//!
//! [`SchemaSynchronizer`] reconciles the persisted scheme and structures of
//! an application type with its [`TypeDescriptor`]. Levels are processed
//! breadth-first: all fields of one scope are reconciled before the scopes
//! of nested composites, whose structures hang below the field's structure.
//!
//! The whole run happens inside one transaction. The resulting scheme row
//! and [`StructureTree`] are cached; a changed structure hash or a legacy
//! rename invalidates older cache entries first.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use eav_hash::ContentHasher;
use eav_store::{
    Backend, CollectionKind, SchemeKind, SchemeRow, StoreError, StructureRow, Transaction,
};
use eav_types::{
    FieldDescriptor, FieldShape, FieldType, SchemeId, StorageKind, StructureId, TypeCatalog,
    TypeDescriptor, TypeRef,
};

use crate::cache::SchemaCache;
use crate::error::{SchemaError, SchemaResult};
use crate::tree::StructureTree;

/// Synchronizer settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete structures whose field no longer exists on the type.
    pub strict: bool,
    /// Maximum composite nesting below the root type.
    pub max_depth: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            strict: false,
            max_depth: 32,
        }
    }
}

/// What one synchronization changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// The scheme did not exist before.
    pub created: bool,
    /// Legacy short name the scheme was renamed from.
    pub renamed_from: Option<String>,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Structures whose storage type changed.
    pub migrated: usize,
    /// Value rows removed by migrations and strict deletes.
    pub values_cleared: u64,
    pub hash_changed: bool,
}

impl SyncReport {
    /// Returns `true` if nothing was written.
    pub fn is_noop(&self) -> bool {
        !self.created
            && self.renamed_from.is_none()
            && self.inserted == 0
            && self.updated == 0
            && self.deleted == 0
            && self.migrated == 0
            && !self.hash_changed
    }
}

/// A synchronized scheme with its structure tree.
#[derive(Clone, Debug)]
pub struct SyncOutcome {
    pub scheme: SchemeRow,
    pub tree: Arc<StructureTree>,
    pub report: SyncReport,
}

/// Invoked before a structure's storage type or collection kind changes.
#[async_trait]
pub trait TypeMigrationHook: Send + Sync {
    /// Prepare existing value rows for the retyped structure. `subtree` holds
    /// `old.id` and every structure below it. Returns the number of value
    /// rows removed.
    async fn migrate(
        &self,
        tx: &mut dyn Transaction,
        old: &StructureRow,
        new: &StructureRow,
        subtree: &[StructureId],
    ) -> SchemaResult<u64>;
}

/// Drops every value row of the retyped subtree.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClearValuesMigration;

#[async_trait]
impl TypeMigrationHook for ClearValuesMigration {
    async fn migrate(
        &self,
        tx: &mut dyn Transaction,
        _old: &StructureRow,
        _new: &StructureRow,
        subtree: &[StructureId],
    ) -> SchemaResult<u64> {
        Ok(tx.delete_structure_values(subtree).await?)
    }
}

struct Level {
    descriptor: TypeDescriptor,
    parent: Option<StructureId>,
    /// Composite type names from the root type down to this level.
    ancestors: Vec<String>,
}

/// Reconciles persisted schemes with type descriptors.
pub struct SchemaSynchronizer {
    catalog: Arc<TypeCatalog>,
    cache: Arc<SchemaCache>,
    options: SyncOptions,
    migration: Arc<dyn TypeMigrationHook>,
}

impl SchemaSynchronizer {
    pub fn new(catalog: Arc<TypeCatalog>, cache: Arc<SchemaCache>, options: SyncOptions) -> Self {
        Self {
            catalog,
            cache,
            options,
            migration: Arc::new(ClearValuesMigration),
        }
    }

    /// Replace the type-migration hook.
    pub fn with_migration(mut self, hook: Arc<dyn TypeMigrationHook>) -> Self {
        self.migration = hook;
        self
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    /// The scheme and tree of a type, synchronizing on first use.
    pub async fn ensure(
        &self,
        backend: &dyn Backend,
        type_ref: TypeRef,
    ) -> SchemaResult<(SchemeRow, Arc<StructureTree>)> {
        let descriptor = type_ref.descriptor();
        if self.cache.is_synced(&descriptor.name)? {
            if let Some(scheme) = self.cache.scheme(&descriptor.name)? {
                if let Some(tree) = self.cache.tree(scheme.id)? {
                    return Ok((scheme, tree));
                }
            }
        }
        let outcome = self.sync(backend, &descriptor).await?;
        Ok((outcome.scheme, outcome.tree))
    }

    /// Synchronize one type in its own transaction and refresh the caches.
    pub async fn sync(
        &self,
        backend: &dyn Backend,
        descriptor: &TypeDescriptor,
    ) -> SchemaResult<SyncOutcome> {
        let mut tx = backend.begin().await?;
        let outcome = match self.sync_in(backend, tx.as_mut(), descriptor).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed sync");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        if outcome.report.hash_changed || outcome.report.renamed_from.is_some() {
            self.cache
                .invalidate(&descriptor.name, Some(outcome.scheme.id))?;
            if let Some(legacy) = &outcome.report.renamed_from {
                self.cache.invalidate(legacy, None)?;
            }
        }
        self.cache.put_scheme(outcome.scheme.clone())?;
        self.cache.put_tree(Arc::clone(&outcome.tree))?;
        self.cache.mark_synced(&descriptor.name)?;
        Ok(outcome)
    }

    /// The structure tree of a scheme, from cache or backend.
    pub async fn tree(
        &self,
        backend: &dyn Backend,
        scheme: SchemeId,
    ) -> SchemaResult<Arc<StructureTree>> {
        if let Some(tree) = self.cache.tree(scheme)? {
            return Ok(tree);
        }
        let rows = backend.structures(scheme).await?;
        let tree = Arc::new(StructureTree::build(scheme, rows, &self.catalog)?);
        self.cache.put_tree(Arc::clone(&tree))?;
        Ok(tree)
    }

    /// A scheme row by id.
    pub async fn scheme(&self, backend: &dyn Backend, id: SchemeId) -> SchemaResult<SchemeRow> {
        if let Some(scheme) = self.cache.scheme_by_id(id)? {
            return Ok(scheme);
        }
        let scheme = backend
            .scheme(id)
            .await?
            .ok_or_else(|| SchemaError::SchemeNotFound(id.to_string()))?;
        self.cache.put_scheme(scheme.clone())?;
        Ok(scheme)
    }

    /// Synchronize inside a caller-owned transaction. Caches are untouched.
    pub async fn sync_in(
        &self,
        backend: &dyn Backend,
        tx: &mut dyn Transaction,
        descriptor: &TypeDescriptor,
    ) -> SchemaResult<SyncOutcome> {
        let mut report = SyncReport::default();
        let mut scheme = self.resolve_scheme(backend, tx, descriptor, &mut report).await?;

        let mut current: BTreeMap<StructureId, StructureRow> = tx
            .structures(scheme.id)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut queue = VecDeque::from([Level {
            descriptor: descriptor.clone(),
            parent: None,
            ancestors: vec![descriptor.name.clone()],
        }]);
        while let Some(level) = queue.pop_front() {
            self.reconcile_level(backend, tx, &scheme, &mut current, level, &mut queue, &mut report)
                .await?;
        }

        let sorted: Vec<&StructureRow> = current.values().collect();
        let hash = ContentHasher::STRUCTURE.hash_json(&sorted)?;
        if scheme.structure_hash != Some(hash) {
            scheme.structure_hash = Some(hash);
            tx.update_scheme(&scheme).await?;
            report.hash_changed = true;
            info!(
                scheme = %scheme.id,
                name = %scheme.name,
                hash = %hash.short_hex(),
                structures = current.len(),
                "structure hash updated"
            );
        }

        let tree = StructureTree::build(scheme.id, current.into_values().collect(), &self.catalog)?;
        debug!(scheme = %scheme.id, ?report, "scheme synchronized");
        Ok(SyncOutcome {
            scheme,
            tree: Arc::new(tree),
            report,
        })
    }

    async fn resolve_scheme(
        &self,
        backend: &dyn Backend,
        tx: &mut dyn Transaction,
        descriptor: &TypeDescriptor,
        report: &mut SyncReport,
    ) -> SchemaResult<SchemeRow> {
        if let Some(mut scheme) = tx.scheme_by_name(&descriptor.name).await? {
            if scheme.alias != descriptor.alias {
                scheme.alias = descriptor.alias.clone();
                tx.update_scheme(&scheme).await?;
            }
            return Ok(scheme);
        }

        let short = descriptor.short_name();
        if short != descriptor.name {
            if let Some(mut legacy) = tx.scheme_by_name(short).await? {
                info!(scheme = %legacy.id, from = short, to = %descriptor.name, "renaming legacy scheme");
                legacy.name = descriptor.name.clone();
                legacy.alias = descriptor.alias.clone();
                tx.update_scheme(&legacy).await?;
                report.renamed_from = Some(short.to_string());
                return Ok(legacy);
            }
        }

        let scheme = SchemeRow {
            id: SchemeId::new(backend.next_id().await?),
            name: descriptor.name.clone(),
            alias: descriptor.alias.clone(),
            kind: SchemeKind::Object,
            structure_hash: None,
        };
        tx.insert_scheme(&scheme).await?;
        report.created = true;
        info!(scheme = %scheme.id, name = %scheme.name, "created scheme");
        Ok(scheme)
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_level(
        &self,
        backend: &dyn Backend,
        tx: &mut dyn Transaction,
        scheme: &SchemeRow,
        current: &mut BTreeMap<StructureId, StructureRow>,
        level: Level,
        queue: &mut VecDeque<Level>,
        report: &mut SyncReport,
    ) -> SchemaResult<()> {
        let ambiguous = |name: &str| SchemaError::AmbiguousStructure {
            scheme: scheme.name.clone(),
            parent: level.parent,
            name: name.to_string(),
        };

        let mut existing: HashMap<String, StructureId> = HashMap::new();
        for row in current.values().filter(|r| r.parent_id == level.parent) {
            if existing.insert(row.name.clone(), row.id).is_some() {
                return Err(ambiguous(&row.name));
            }
        }

        let mut seen = HashSet::new();
        let mut desired = Vec::with_capacity(level.descriptor.fields.len());
        for (order, field) in level.descriptor.fields.iter().enumerate() {
            if !seen.insert(field.name.as_str()) {
                return Err(ambiguous(&field.name));
            }
            desired.push((field, self.desired_row(scheme.id, level.parent, order, field)?));
        }

        let missing = desired
            .iter()
            .filter(|(f, _)| !existing.contains_key(&f.name))
            .count();
        let mut fresh = backend
            .next_ids(missing)
            .await?
            .into_iter()
            .map(StructureId::new);

        let mut inserts = Vec::new();
        let mut children = Vec::new();
        for (field, mut row) in desired {
            match existing.get(&field.name).and_then(|id| current.get(id)).cloned() {
                None => {
                    row.id = fresh.next().ok_or(StoreError::IdsExhausted(missing))?;
                    current.insert(row.id, row.clone());
                    inserts.push(row.clone());
                    report.inserted += 1;
                }
                Some(old) => {
                    row.id = old.id;
                    if storage_changed(&old, &row) {
                        self.retype(tx, current, &old, &row, report).await?;
                    }
                    if old != row {
                        tx.update_structures(std::slice::from_ref(&row)).await?;
                        current.insert(row.id, row.clone());
                        report.updated += 1;
                    }
                }
            }
            if let FieldType::Composite(child) = field.shape.element() {
                children.push(self.child_level(&level, child, row.id)?);
            }
        }
        if !inserts.is_empty() {
            tx.insert_structures(&inserts).await?;
        }

        if self.options.strict {
            let stale: Vec<StructureId> = existing
                .iter()
                .filter(|(name, _)| !seen.contains(name.as_str()))
                .map(|(_, id)| *id)
                .collect();
            for id in stale {
                let subtree = subtree_ids(current, id);
                report.values_cleared += tx.delete_structure_values(&subtree).await?;
                tx.delete_structures(&subtree).await?;
                for s in &subtree {
                    current.remove(s);
                }
                report.deleted += subtree.len();
                info!(scheme = %scheme.id, structure = %id, "removed stale structure");
            }
        } else {
            // Stale fields stay readable but must not constrain new saves.
            let relaxed: Vec<StructureRow> = existing
                .iter()
                .filter(|(name, _)| !seen.contains(name.as_str()))
                .filter_map(|(_, id)| current.get(id))
                .filter(|row| row.required || row.store_null)
                .map(|row| StructureRow {
                    required: false,
                    store_null: false,
                    ..row.clone()
                })
                .collect();
            if !relaxed.is_empty() {
                tx.update_structures(&relaxed).await?;
                report.updated += relaxed.len();
                for row in relaxed {
                    debug!(
                        scheme = %scheme.id,
                        structure = %row.id,
                        name = %row.name,
                        "relaxed stale structure"
                    );
                    current.insert(row.id, row);
                }
            }
        }

        queue.extend(children);
        Ok(())
    }

    async fn retype(
        &self,
        tx: &mut dyn Transaction,
        current: &mut BTreeMap<StructureId, StructureRow>,
        old: &StructureRow,
        new: &StructureRow,
        report: &mut SyncReport,
    ) -> SchemaResult<()> {
        let subtree = subtree_ids(current, old.id);
        report.values_cleared += self.migration.migrate(tx, old, new, &subtree).await?;
        report.migrated += 1;
        warn!(
            structure = %old.id,
            name = %old.name,
            from = %old.type_id,
            to = %new.type_id,
            "structure storage type changed"
        );

        let was_composite = self.catalog.kind_of(old.type_id)? == StorageKind::Class;
        let is_composite = self.catalog.kind_of(new.type_id)? == StorageKind::Class;
        if was_composite && !is_composite && subtree.len() > 1 {
            report.values_cleared += tx.delete_structure_values(&subtree).await?;
            let stale = &subtree[1..];
            tx.delete_structures(stale).await?;
            for s in stale {
                current.remove(s);
            }
            report.deleted += stale.len();
        }
        Ok(())
    }

    fn child_level(
        &self,
        level: &Level,
        child: TypeRef,
        parent: StructureId,
    ) -> SchemaResult<Level> {
        let descriptor = child.descriptor();
        if level.ancestors.contains(&descriptor.name) {
            let mut path = level.ancestors.join(" -> ");
            path.push_str(" -> ");
            path.push_str(&descriptor.name);
            return Err(SchemaError::CyclicComposite { path });
        }
        if level.ancestors.len() > self.options.max_depth {
            return Err(SchemaError::DepthExceeded {
                type_name: descriptor.name,
                max_depth: self.options.max_depth,
            });
        }
        let mut ancestors = level.ancestors.clone();
        ancestors.push(descriptor.name.clone());
        Ok(Level {
            descriptor,
            parent: Some(parent),
            ancestors,
        })
    }

    fn desired_row(
        &self,
        scheme: SchemeId,
        parent: Option<StructureId>,
        order: usize,
        field: &FieldDescriptor,
    ) -> SchemaResult<StructureRow> {
        if field.name.is_empty() {
            return Err(SchemaError::UnsupportedFieldType {
                field: field.name.clone(),
                reason: "empty field name".into(),
            });
        }
        let type_id = self.catalog.id_of(storage_kind(field.shape.element()))?;
        let (collection, key_type) = match field.shape {
            FieldShape::Single(_) => (CollectionKind::None, None),
            FieldShape::Array(_) => (CollectionKind::Array, None),
            FieldShape::Dictionary { key, .. } => {
                if !key.is_key_kind() {
                    return Err(SchemaError::UnsupportedFieldType {
                        field: field.name.clone(),
                        reason: format!("{key} cannot be a dictionary key"),
                    });
                }
                let key_type = self.catalog.id_of(StorageKind::Scalar(key))?;
                (CollectionKind::Dictionary, Some(key_type))
            }
        };
        Ok(StructureRow {
            id: StructureId::new(0),
            scheme_id: scheme,
            parent_id: parent,
            name: field.name.clone(),
            alias: field.alias.clone(),
            type_id,
            required: field.required,
            collection,
            key_type,
            store_null: field.store_null,
            order: order as i32,
        })
    }
}

fn storage_kind(field_type: FieldType) -> StorageKind {
    match field_type {
        FieldType::Scalar(k) => StorageKind::Scalar(k),
        FieldType::Reference => StorageKind::Reference,
        FieldType::ListItem => StorageKind::ListItem,
        FieldType::Composite(_) => StorageKind::Class,
    }
}

fn storage_changed(old: &StructureRow, new: &StructureRow) -> bool {
    old.type_id != new.type_id || old.collection != new.collection || old.key_type != new.key_type
}

/// `root` and every structure below it, parents first.
fn subtree_ids(rows: &BTreeMap<StructureId, StructureRow>, root: StructureId) -> Vec<StructureId> {
    let mut out = vec![root];
    let mut i = 0;
    while i < out.len() {
        let parent = out[i];
        out.extend(
            rows.values()
                .filter(|r| r.parent_id == Some(parent))
                .map(|r| r.id),
        );
        i += 1;
    }
    out
}

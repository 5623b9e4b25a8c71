//! The save path.
//!
//! One call persists one or more root graphs in a single transaction:
//!
//! 1. synchronize the scheme of every type in the graphs (own transactions)
//! 2. begin, row-lock every identified entity, apply the missing-entity policy
//! 3. allocate ids for new entities and seal content hashes bottom-up
//! 4. upsert entity rows and encode value rows
//! 5. write value rows with the configured [`Strategy`]
//! 6. commit, then refresh the props cache
//!
//! Ids and hashes are written back into the caller's graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use eav_diff::{diff_entity_values, ValueChanges};
use eav_graph::{
    assign_ids, collect, count_unidentified, distinct_types, embedded_ids, external_refs,
    for_each_ref_mut, seal_hashes, sort_by_dependency, EncodedBatch, GraphError, GraphResult,
    ValueEncoder,
};
use eav_schema::StructureTree;
use eav_store::{ObjectRow, SchemeRow, Transaction, ValueRow};
use eav_types::{ContentHash, Entity, EntityId, Persist};

use crate::config::{MissingEntityPolicy, Strategy};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

/// Rows written by one save call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub objects_inserted: usize,
    pub objects_updated: usize,
    pub objects_unchanged: usize,
    pub values_inserted: usize,
    pub values_updated: usize,
    /// Container rows whose hash changed.
    pub values_rehashed: usize,
    pub values_deleted: usize,
    /// Root graphs skipped by the `ignore` missing-entity policy.
    pub skipped_roots: usize,
}

impl SaveReport {
    /// Value rows inserted, updated or deleted.
    pub fn value_writes(&self) -> usize {
        self.values_inserted + self.values_updated + self.values_rehashed + self.values_deleted
    }

    /// Returns `true` if the save wrote nothing.
    pub fn is_noop(&self) -> bool {
        self.objects_inserted == 0 && self.objects_updated == 0 && self.value_writes() == 0
    }
}

type Schemes = HashMap<&'static str, (SchemeRow, Arc<StructureTree>)>;

struct Saved {
    report: SaveReport,
    kept: Vec<bool>,
}

impl Engine {
    /// Save one entity graph.
    pub async fn save(&self, entity: &mut Entity) -> EngineResult<SaveReport> {
        self.save_many(std::slice::from_mut(entity)).await
    }

    /// Save a typed object as a new entity, or over `id`. Returns its id.
    pub async fn save_typed<T: Persist>(
        &self,
        id: Option<EntityId>,
        value: &T,
    ) -> EngineResult<Option<EntityId>> {
        let mut entity = Entity::from_typed(value);
        entity.id = id;
        let report = self.save(&mut entity).await?;
        Ok(if report.skipped_roots > 0 { None } else { entity.id })
    }

    /// Save several independent root graphs in one transaction.
    pub async fn save_many(&self, roots: &mut [Entity]) -> EngineResult<SaveReport> {
        let inner = &self.inner;
        if inner.config.strategy == Strategy::ChangeTracking
            && !inner.backend.capabilities().change_tracking
        {
            return Err(EngineError::UnsupportedStrategy(
                "change tracking is not available on this backend".into(),
            ));
        }

        let mut schemes: Schemes = HashMap::new();
        for root in roots.iter() {
            for type_ref in distinct_types(root) {
                if !schemes.contains_key(type_ref.name()) {
                    let resolved = self.ensure_scheme(type_ref).await?;
                    schemes.insert(type_ref.name(), resolved);
                }
            }
        }

        let mut tx = inner.backend.begin().await?;
        let saved = match self.save_in(tx.as_mut(), roots, &schemes).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed save");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        let domain = &inner.config.cache_domain;
        for (root, _) in roots.iter().zip(&saved.kept).filter(|(_, kept)| **kept) {
            for entity in collect(root) {
                if let Err(e) = inner.cache.put(domain, entity.clone()) {
                    warn!(error = %e, "props cache refresh failed");
                }
            }
        }

        let r = &saved.report;
        info!(
            roots = roots.len(),
            strategy = ?inner.config.strategy,
            objects_inserted = r.objects_inserted,
            objects_updated = r.objects_updated,
            values_inserted = r.values_inserted,
            values_updated = r.values_updated,
            values_deleted = r.values_deleted,
            skipped = r.skipped_roots,
            "saved"
        );
        Ok(saved.report)
    }

    async fn save_in(
        &self,
        tx: &mut dyn Transaction,
        roots: &mut [Entity],
        schemes: &Schemes,
    ) -> EngineResult<Saved> {
        let inner = &self.inner;
        let mut report = SaveReport::default();

        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        for root in roots.iter() {
            targets.extend(embedded_ids(root).into_iter().filter(|id| seen.insert(*id)));
        }
        let existing: HashMap<EntityId, ObjectRow> = if targets.is_empty() {
            HashMap::new()
        } else {
            tx.lock_objects(&targets)
                .await?
                .into_iter()
                .map(|row| (row.id, row))
                .collect()
        };

        let mut kept = vec![true; roots.len()];
        for (root, keep) in roots.iter().zip(kept.iter_mut()) {
            let Some(missing) = embedded_ids(root)
                .into_iter()
                .find(|id| !existing.contains_key(id))
            else {
                continue;
            };
            match inner.config.missing_entity {
                MissingEntityPolicy::Throw => return Err(EngineError::MissingEntity(missing)),
                MissingEntityPolicy::Insert => {
                    debug!(id = %missing, "inserting entity under supplied id");
                }
                MissingEntityPolicy::Ignore => {
                    warn!(id = %missing, "skipping root graph with missing entity");
                    *keep = false;
                    report.skipped_roots += 1;
                }
            }
        }

        let needed: usize = kept_roots(roots, &kept).map(count_unidentified).sum();
        if needed > 0 {
            let mut ids = inner
                .backend
                .next_ids(needed)
                .await?
                .into_iter()
                .map(EntityId::new);
            for root in kept_roots_mut(roots, &kept) {
                assign_ids(root, &mut ids)?;
            }
        }

        let now = Utc::now();
        for root in kept_roots_mut(roots, &kept) {
            stamp(root, schemes, &existing, now)?;
        }

        let mut external = Vec::new();
        let mut seen = HashSet::new();
        for root in kept_roots(roots, &kept) {
            external.extend(external_refs(root).into_iter().filter(|id| seen.insert(*id)));
        }
        let known = self.seal(tx, roots, &kept, &external).await?;
        for root in kept_roots_mut(roots, &kept) {
            touch(root, &existing, now)?;
        }

        let mut flat: Vec<&Entity> = Vec::new();
        let mut seen = HashSet::new();
        for root in kept_roots(roots, &kept) {
            flat.extend(
                collect(root)
                    .into_iter()
                    .filter(|e| e.id.map_or(true, |id| seen.insert(id))),
            );
        }

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut stored = Vec::new();
        for entity in &flat {
            let row = object_row(entity)?;
            match existing.get(&row.id) {
                None => inserts.push(row),
                Some(old) => {
                    stored.push(row.id);
                    let changed = old.hash != row.hash
                        || old.header != row.header
                        || old.scheme_id != row.scheme_id;
                    if changed || inner.config.strategy == Strategy::DeleteInsert {
                        updates.push(row);
                    } else {
                        report.objects_unchanged += 1;
                    }
                }
            }
        }
        if !inserts.is_empty() {
            tx.insert_objects(&inserts).await?;
        }
        if !updates.is_empty() {
            tx.update_objects(&updates).await?;
        }
        report.objects_inserted = inserts.len();
        report.objects_updated = updates.len();

        let batch = encode(&flat, schemes, &known, inner.config.max_depth)?;
        debug!(entities = flat.len(), rows = batch.len(), "encoded value rows");

        match inner.config.strategy {
            Strategy::DeleteInsert => self.delete_insert(tx, &stored, batch, &mut report).await?,
            Strategy::ChangeTracking => {
                let order: Vec<EntityId> = flat.iter().filter_map(|e| e.id).collect();
                self.change_tracking(tx, &order, &stored, batch, &mut report)
                    .await?
            }
        }

        Ok(Saved { report, kept })
    }

    /// Seal hashes bottom-up. Entities referenced by id take their stored
    /// hash, or their new one if the same save embeds them elsewhere.
    async fn seal(
        &self,
        tx: &mut dyn Transaction,
        roots: &mut [Entity],
        kept: &[bool],
        external: &[EntityId],
    ) -> EngineResult<HashMap<EntityId, ContentHash>> {
        let calc = &self.inner.calc;
        let mut known: HashMap<EntityId, ContentHash> = if external.is_empty() {
            HashMap::new()
        } else {
            tx.object_hashes(external)
                .await?
                .into_iter()
                .filter_map(|(id, hash)| hash.map(|h| (id, h)))
                .collect()
        };
        for root in kept_roots_mut(roots, kept) {
            seal_hashes(root, &known, calc)?;
        }

        let external: HashSet<EntityId> = external.iter().copied().collect();
        let mut stale = false;
        for root in kept_roots(roots, kept) {
            for entity in collect(root) {
                if let (Some(id), Some(hash)) = (entity.id, entity.hash) {
                    let previous = known.insert(id, hash);
                    stale |= external.contains(&id) && previous != Some(hash);
                }
            }
        }
        if stale {
            for root in kept_roots_mut(roots, kept) {
                seal_hashes(root, &known, calc)?;
            }
        }
        Ok(known)
    }

    async fn delete_insert(
        &self,
        tx: &mut dyn Transaction,
        stored: &[EntityId],
        mut batch: EncodedBatch,
        report: &mut SaveReport,
    ) -> EngineResult<()> {
        if !stored.is_empty() {
            report.values_deleted = tx.delete_object_values(stored).await? as usize;
        }
        if batch.is_empty() {
            return Ok(());
        }
        let ids = self.inner.backend.next_ids(batch.len()).await?;
        batch.assign_ids(&ids)?;
        let rows = sort_by_dependency(batch.into_rows())?;
        tx.insert_values(&rows).await?;
        report.values_inserted = rows.len();
        Ok(())
    }

    async fn change_tracking(
        &self,
        tx: &mut dyn Transaction,
        order: &[EntityId],
        stored: &[EntityId],
        batch: EncodedBatch,
        report: &mut SaveReport,
    ) -> EngineResult<()> {
        let old_rows = if stored.is_empty() {
            Vec::new()
        } else {
            tx.values(stored).await?
        };
        let mut old = group_by_object(old_rows);
        let mut new = group_by_object(batch.into_rows());
        let stored: HashSet<EntityId> = stored.iter().copied().collect();

        let mut changes = ValueChanges::new();
        for id in order {
            let fresh = new.remove(id).unwrap_or_default();
            if stored.contains(id) {
                let previous = old.remove(id).unwrap_or_default();
                changes.extend(diff_entity_values(*id, &previous, &fresh)?);
            } else {
                changes.inserted.extend(fresh);
            }
        }

        if !changes.deleted.is_empty() {
            tx.delete_values(&changes.deleted).await?;
        }
        let rewritten: Vec<ValueRow> = changes
            .updated
            .iter()
            .chain(&changes.rehashed)
            .cloned()
            .collect();
        if !rewritten.is_empty() {
            tx.update_values(&rewritten).await?;
        }
        report.values_deleted = changes.deleted.len();
        report.values_updated = changes.updated.len();
        report.values_rehashed = changes.rehashed.len();

        if !changes.inserted.is_empty() {
            let ids = self.inner.backend.next_ids(changes.inserted.len()).await?;
            changes.assign_insert_ids(&ids)?;
            let rows = sort_by_dependency(std::mem::take(&mut changes.inserted))?;
            tx.insert_values(&rows).await?;
            report.values_inserted = rows.len();
        }
        Ok(())
    }
}

fn kept_roots<'a>(roots: &'a [Entity], kept: &'a [bool]) -> impl Iterator<Item = &'a Entity> {
    roots.iter().zip(kept).filter(|(_, k)| **k).map(|(r, _)| r)
}

fn kept_roots_mut<'a>(
    roots: &'a mut [Entity],
    kept: &'a [bool],
) -> impl Iterator<Item = &'a mut Entity> {
    roots.iter_mut().zip(kept).filter(|(_, k)| **k).map(|(r, _)| r)
}

/// Fill scheme ids and creation dates throughout a graph.
fn stamp(
    entity: &mut Entity,
    schemes: &Schemes,
    existing: &HashMap<EntityId, ObjectRow>,
    now: DateTime<Utc>,
) -> GraphResult<()> {
    if let Some((scheme, _)) = schemes.get(entity.type_ref.name()) {
        entity.scheme_id = Some(scheme.id);
    }
    if entity.header.date_create.is_none() {
        let stored = entity
            .id
            .and_then(|id| existing.get(&id))
            .and_then(|row| row.header.date_create);
        entity.header.date_create = Some(stored.unwrap_or(now));
    }
    for_each_ref_mut(&mut entity.props, &mut |r| {
        if let Some(nested) = r.entity_mut() {
            stamp(nested, schemes, existing, now)?;
        }
        Ok(())
    })
}

/// Advance modification dates on entities that are new or whose hash moved
/// away from the stored row. Unchanged entities keep the stored date.
fn touch(
    entity: &mut Entity,
    existing: &HashMap<EntityId, ObjectRow>,
    now: DateTime<Utc>,
) -> GraphResult<()> {
    match entity.id.and_then(|id| existing.get(&id)) {
        Some(row) if row.hash == entity.hash => {
            if entity.header.date_modify.is_none() {
                entity.header.date_modify = row.header.date_modify;
            }
        }
        _ => entity.header.date_modify = Some(now),
    }
    for_each_ref_mut(&mut entity.props, &mut |r| {
        if let Some(nested) = r.entity_mut() {
            touch(nested, existing, now)?;
        }
        Ok(())
    })
}

fn object_row(entity: &Entity) -> EngineResult<ObjectRow> {
    let id = entity.id.ok_or(GraphError::IdsExhausted)?;
    let scheme_id = entity
        .scheme_id
        .ok_or_else(|| EngineError::UnregisteredType(entity.type_ref.name().to_string()))?;
    Ok(ObjectRow {
        id,
        scheme_id,
        hash: entity.hash,
        header: entity.header.clone(),
    })
}

fn encode(
    flat: &[&Entity],
    schemes: &Schemes,
    known: &HashMap<EntityId, ContentHash>,
    max_depth: usize,
) -> EngineResult<EncodedBatch> {
    let mut encoder = ValueEncoder::new(known, max_depth);
    for entity in flat {
        let (_, tree) = schemes
            .get(entity.type_ref.name())
            .ok_or_else(|| EngineError::UnregisteredType(entity.type_ref.name().to_string()))?;
        encoder.encode(entity, tree)?;
    }
    Ok(encoder.finish())
}

pub(crate) fn group_by_object(rows: Vec<ValueRow>) -> HashMap<EntityId, Vec<ValueRow>> {
    let mut grouped: HashMap<EntityId, Vec<ValueRow>> = HashMap::new();
    for row in rows {
        grouped.entry(row.object_id).or_default().push(row);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use eav_store::{Backend, BackendCapabilities, ValueData};
    use eav_types::{EntityRef, Record, TypeRef, Value};

    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{
        customer, engine, engine_with, engine_without, invoice, numeric, Customer, Invoice,
        Sample,
    };

    fn tracking() -> EngineConfig {
        EngineConfig {
            strategy: Strategy::ChangeTracking,
            ..EngineConfig::default()
        }
    }

    fn invoice_entity(customer: Entity) -> Entity {
        Entity::from_typed(&invoice(
            "125.50",
            &[("A-1", 2), ("B-7", 1)],
            Some(EntityRef::to(customer)),
        ))
    }

    fn tags(items: &[&str]) -> Entity {
        Entity::new(
            TypeRef::of::<Sample>(),
            Record::new().with("Tags", Value::array(items.iter().copied())),
        )
    }

    fn value_ids(rows: &[ValueRow]) -> HashSet<eav_types::ValueId> {
        rows.iter().map(|r| r.id).collect()
    }

    // ---- Row layout ----

    #[tokio::test]
    async fn invoice_with_new_customer_writes_two_objects() {
        let (engine, backend) = engine().await;
        let mut root = invoice_entity(customer("Acme"));
        let report = engine.save(&mut root).await.unwrap();

        assert_eq!(report.objects_inserted, 2);
        assert_eq!(report.values_inserted, 10);
        assert_eq!(backend.object_count().unwrap(), 2);

        let rows = backend.values(&[root.id.unwrap()]).await.unwrap();
        assert_eq!(rows.len(), 9);
        assert_eq!(rows.iter().filter(|r| r.is_container()).count(), 3);
        let customer_id = match root.props.get("Customer") {
            Some(Value::Ref(r)) => r.id().unwrap(),
            other => panic!("unexpected customer field {other:?}"),
        };
        assert!(rows
            .iter()
            .any(|r| r.data == ValueData::Object(customer_id)));
    }

    #[tokio::test]
    async fn save_writes_back_ids_and_hashes() {
        let (engine, _) = engine().await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();

        assert!(root.id.unwrap().get() > 0);
        assert!(root.hash.is_some());
        assert!(root.scheme_id.is_some());
        assert!(root.header.date_create.is_some());
        let nested = collect(&root)[1];
        assert!(nested.id.is_some());
        assert!(nested.hash.is_some());
        assert_ne!(nested.scheme_id, root.scheme_id);
    }

    #[tokio::test]
    async fn saved_graph_is_cached() {
        let (engine, _) = engine().await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        assert_eq!(engine.cache().len("default").unwrap(), 2);
    }

    #[tokio::test]
    async fn typed_save_round_trips() {
        let (engine, _) = engine().await;
        let value = invoice("9.99", &[("Z-9", 4)], None);
        let id = engine.save_typed(None, &value).await.unwrap().unwrap();
        engine.cache().clear().unwrap();

        let loaded: Invoice = engine.load_typed(id).await.unwrap().unwrap();
        assert_eq!(loaded, value);
    }

    // ---- Hashes ----

    #[tokio::test]
    async fn resave_keeps_hash() {
        let (engine, _) = engine().await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        let first = root.hash;

        let report = engine.save(&mut root).await.unwrap();
        assert_eq!(root.hash, first);
        assert_eq!(report.objects_inserted, 0);
        assert_eq!(report.objects_updated, 2);
    }

    #[tokio::test]
    async fn hash_follows_content() {
        let (engine, _) = engine().await;
        let mut same_a = invoice_entity(customer("Acme"));
        let mut same_b = invoice_entity(customer("Acme"));
        let mut other_customer = invoice_entity(customer("Globex"));
        let mut other_line = Entity::from_typed(&invoice(
            "125.50",
            &[("A-1", 3), ("B-7", 1)],
            Some(EntityRef::to(customer("Acme"))),
        ));
        for entity in [
            &mut same_a,
            &mut same_b,
            &mut other_customer,
            &mut other_line,
        ] {
            engine.save(entity).await.unwrap();
        }

        assert_ne!(same_a.id, same_b.id);
        assert_eq!(same_a.hash, same_b.hash);
        assert_ne!(same_a.hash, other_customer.hash);
        assert_ne!(same_a.hash, other_line.hash);
    }

    // ---- Change tracking ----

    #[tokio::test]
    async fn unchanged_resave_writes_nothing() {
        let (engine, backend) = engine_with(tracking()).await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        backend.reset_stats().unwrap();

        let report = engine.save(&mut root).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.objects_unchanged, 2);
        let stats = backend.stats().unwrap();
        assert_eq!(stats.value_writes(), 0);
        assert_eq!(stats.objects_updated, 0);
    }

    #[tokio::test]
    async fn unchanged_resave_keeps_modify_date() {
        let (engine, backend) = engine_with(tracking()).await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        let first = root.header.date_modify;
        assert!(first.is_some());
        assert_eq!(first, root.header.date_create);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let report = engine.save(&mut root).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(root.header.date_modify, first);
        let rows = backend.objects(&[root.id.unwrap()]).await.unwrap();
        assert_eq!(rows[0].header.date_modify, first);
    }

    #[tokio::test]
    async fn changed_resave_advances_modify_date() {
        let (engine, backend) = engine_with(tracking()).await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        let first = root.header.date_modify.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        root.props.set("Total", numeric("1.00"));
        let report = engine.save(&mut root).await.unwrap();
        assert_eq!(report.objects_updated, 1);
        assert_eq!(report.objects_unchanged, 1);

        let second = root.header.date_modify.unwrap();
        assert!(second > first);
        assert_eq!(root.header.date_create, Some(first));
        assert_eq!(collect(&root)[1].header.date_modify, Some(first));
        let rows = backend.objects(&[root.id.unwrap()]).await.unwrap();
        assert_eq!(rows[0].header.date_modify, Some(second));
    }

    #[tokio::test]
    async fn loaded_copy_resaves_as_noop() {
        let (engine, _) = engine_with(tracking()).await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        engine.cache().clear().unwrap();

        let loaded = engine.load_eager(root.id.unwrap()).await.unwrap().unwrap();
        let mut copy = (*loaded).clone();
        let report = engine.save(&mut copy).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(copy.hash, root.hash);
    }

    #[tokio::test]
    async fn replacing_one_array_element_updates_one_row() {
        let (engine, backend) = engine_with(tracking()).await;
        let mut entity = tags(&["A", "B", "C"]);
        engine.save(&mut entity).await.unwrap();
        let before = backend.values(&[entity.id.unwrap()]).await.unwrap();

        entity.props.set("Tags", Value::array(["A", "X", "C"]));
        let report = engine.save(&mut entity).await.unwrap();
        assert_eq!(report.values_updated, 1);
        assert_eq!(report.values_rehashed, 1);
        assert_eq!(report.values_inserted, 0);
        assert_eq!(report.values_deleted, 0);

        let after = backend.values(&[entity.id.unwrap()]).await.unwrap();
        assert_eq!(value_ids(&before), value_ids(&after));
        assert!(after
            .iter()
            .any(|r| r.data == ValueData::String("X".into())));
    }

    #[tokio::test]
    async fn growing_and_shrinking_arrays() {
        let (engine, _) = engine_with(tracking()).await;
        let mut entity = tags(&["A", "B"]);
        engine.save(&mut entity).await.unwrap();

        entity.props.set("Tags", Value::array(["A", "B", "C"]));
        let grown = engine.save(&mut entity).await.unwrap();
        assert_eq!((grown.values_inserted, grown.values_deleted), (1, 0));

        entity.props.set("Tags", Value::array(["A"]));
        let shrunk = engine.save(&mut entity).await.unwrap();
        assert_eq!((shrunk.values_inserted, shrunk.values_deleted), (0, 2));

        engine.cache().clear().unwrap();
        let loaded = engine.load_eager(entity.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.props.get("Tags"), Some(&Value::array(["A"])));
    }

    #[tokio::test]
    async fn change_tracking_needs_backend_support() {
        let caps = BackendCapabilities {
            change_tracking: false,
            ..BackendCapabilities::default()
        };
        let (engine, backend) = engine_without(caps, tracking()).await;
        let mut root = invoice_entity(customer("Acme"));

        let err = engine.save(&mut root).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedStrategy(_)));
        assert_eq!(backend.scheme_count().unwrap(), 0);
        assert!(root.id.is_none());
    }

    #[tokio::test]
    async fn delete_insert_needs_no_change_tracking() {
        let caps = BackendCapabilities {
            change_tracking: false,
            ..BackendCapabilities::default()
        };
        let (engine, backend) = engine_without(caps, EngineConfig::default()).await;
        let mut root = invoice_entity(customer("Acme"));
        engine.save(&mut root).await.unwrap();
        engine.save(&mut root).await.unwrap();
        assert_eq!(backend.object_count().unwrap(), 2);
    }

    // ---- Missing entities ----

    #[tokio::test]
    async fn missing_entity_throws_by_default() {
        let (engine, backend) = engine().await;
        let ghost = EntityId::new(9_999);
        let mut entity = customer("Ghost").with_id(ghost);

        let err = engine.save(&mut entity).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingEntity(id) if id == ghost));
        assert_eq!(backend.object_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_entity_can_be_inserted() {
        let config = EngineConfig {
            missing_entity: MissingEntityPolicy::Insert,
            ..EngineConfig::default()
        };
        let (engine, _) = engine_with(config).await;
        let ghost = EntityId::new(9_999);
        let customer = Customer {
            name: "Ghost".into(),
        };

        let saved = engine.save_typed(Some(ghost), &customer).await.unwrap();
        assert_eq!(saved, Some(ghost));
        engine.cache().clear().unwrap();
        let loaded: Customer = engine.load_typed(ghost).await.unwrap().unwrap();
        assert_eq!(loaded, customer);
    }

    #[tokio::test]
    async fn missing_entity_skips_its_root() {
        let config = EngineConfig {
            missing_entity: MissingEntityPolicy::Ignore,
            ..EngineConfig::default()
        };
        let (engine, backend) = engine_with(config).await;
        let ghost = EntityId::new(9_999);
        let mut roots = vec![customer("Ghost").with_id(ghost), customer("Real")];

        let report = engine.save_many(&mut roots).await.unwrap();
        assert_eq!(report.skipped_roots, 1);
        assert_eq!(report.objects_inserted, 1);
        assert_eq!(backend.object_count().unwrap(), 1);
        assert!(roots[1].id.is_some());
        assert!(roots[0].hash.is_none());

        let typed = Customer {
            name: "Ghost".into(),
        };
        assert_eq!(engine.save_typed(Some(ghost), &typed).await.unwrap(), None);
    }

    // ---- Transactions ----

    #[tokio::test]
    async fn save_many_commits_once() {
        let (engine, backend) = engine().await;
        engine.sync_scheme::<Customer>().await.unwrap();
        backend.reset_stats().unwrap();

        let mut roots = vec![customer("A"), customer("B"), customer("C")];
        engine.save_many(&mut roots).await.unwrap();
        assert_eq!(backend.stats().unwrap().commits, 1);
        assert_eq!(backend.object_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_root_rolls_back_the_batch() {
        let (engine, backend) = engine().await;
        let valid = Entity::from_typed(&invoice("1", &[], None));
        let invalid = Entity::new(TypeRef::of::<Invoice>(), Record::new());
        let mut roots = vec![valid, invalid];

        let err = engine.save_many(&mut roots).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Graph(GraphError::MissingRequired(_))
        ));
        assert_eq!(backend.object_count().unwrap(), 0);
        assert_eq!(engine.cache().len("default").unwrap(), 0);
    }

    // ---- Shared entities ----

    #[tokio::test]
    async fn shared_entity_is_written_once() {
        let (engine, backend) = engine().await;
        let mut shared = customer("Shared");
        engine.save(&mut shared).await.unwrap();
        backend.reset_stats().unwrap();

        let mut root = Entity::new(
            TypeRef::of::<Sample>(),
            Record::new()
                .with("Best", EntityRef::to(shared.clone()))
                .with(
                    "Holder",
                    Record::new().with("Target", EntityRef::to(shared.clone())),
                ),
        );
        let report = engine.save(&mut root).await.unwrap();
        assert_eq!(report.objects_inserted, 1);
        assert_eq!(report.objects_updated, 1);
        assert_eq!(report.values_inserted, 4);
        assert_eq!(backend.object_count().unwrap(), 2);
        assert_eq!(backend.stats().unwrap().objects_updated, 1);
    }

    #[tokio::test]
    async fn id_reference_takes_stored_hash() {
        let (engine, _) = engine().await;
        let mut shared = customer("Shared");
        engine.save(&mut shared).await.unwrap();
        let id = shared.id.unwrap();

        let mut by_id = Entity::new(
            TypeRef::of::<Sample>(),
            Record::new().with("Best", EntityRef::Id(id)),
        );
        let mut embedded = Entity::new(
            TypeRef::of::<Sample>(),
            Record::new().with("Best", EntityRef::to(shared)),
        );
        engine.save(&mut by_id).await.unwrap();
        engine.save(&mut embedded).await.unwrap();
        assert_eq!(by_id.hash, embedded.hash);
    }
}

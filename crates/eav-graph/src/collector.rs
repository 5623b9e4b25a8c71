//! Object-graph traversal.
//!
//! An entity's payload may embed other entities ([`EntityRef::Entity`]) in
//! single fields, arrays, dictionaries and nested composites. The functions
//! here walk those embeddings to assign ids, seal content hashes bottom-up,
//! and flatten the graph into the list of entities one save writes.
//!
//! Only entities that already carry an id are deduplicated: two embedded
//! copies of the same persisted entity are written once, while two new
//! entities are always distinct.

use std::collections::{HashMap, HashSet};

use eav_hash::HashCalculator;
use eav_types::{ContentHash, Entity, EntityId, EntityRef, Record, TypeRef, Value};

use crate::error::{GraphError, GraphResult};

/// Visit every reference in a record, descending through composites and
/// collections.
pub fn for_each_ref<'a>(record: &'a Record, f: &mut dyn FnMut(&'a EntityRef)) {
    for (_, value) in record.iter() {
        visit_value(value, f);
    }
}

fn visit_value<'a>(value: &'a Value, f: &mut dyn FnMut(&'a EntityRef)) {
    match value {
        Value::Ref(r) => f(r),
        Value::Composite(record) => for_each_ref(record, f),
        Value::Array(items) => items.iter().for_each(|v| visit_value(v, f)),
        Value::Dictionary(entries) => entries.values().for_each(|v| visit_value(v, f)),
        _ => {}
    }
}

/// Mutable variant of [`for_each_ref`]; stops at the first error.
pub fn for_each_ref_mut(
    record: &mut Record,
    f: &mut dyn FnMut(&mut EntityRef) -> GraphResult<()>,
) -> GraphResult<()> {
    for (_, value) in record.iter_mut() {
        visit_value_mut(value, f)?;
    }
    Ok(())
}

fn visit_value_mut(
    value: &mut Value,
    f: &mut dyn FnMut(&mut EntityRef) -> GraphResult<()>,
) -> GraphResult<()> {
    match value {
        Value::Ref(r) => f(r),
        Value::Composite(record) => for_each_ref_mut(record, f),
        Value::Array(items) => items.iter_mut().try_for_each(|v| visit_value_mut(v, f)),
        Value::Dictionary(entries) => entries.values_mut().try_for_each(|v| visit_value_mut(v, f)),
        _ => Ok(()),
    }
}

/// Embedded entities directly referenced by `entity`'s payload.
fn embedded(entity: &Entity) -> Vec<&Entity> {
    let mut out = Vec::new();
    for_each_ref(&entity.props, &mut |r| {
        if let Some(e) = r.entity() {
            out.push(e);
        }
    });
    out
}

/// Number of entities in the graph without an id.
pub fn count_unidentified(root: &Entity) -> usize {
    let own = usize::from(root.id.is_none());
    own + embedded(root).into_iter().map(count_unidentified).sum::<usize>()
}

/// Give every new entity an id, pre-order. Returns the number assigned.
pub fn assign_ids(
    root: &mut Entity,
    ids: &mut dyn Iterator<Item = EntityId>,
) -> GraphResult<usize> {
    let mut assigned = 0;
    if root.id.is_none() {
        root.id = Some(ids.next().ok_or(GraphError::IdsExhausted)?);
        assigned += 1;
    }
    for_each_ref_mut(&mut root.props, &mut |r| {
        if let Some(e) = r.entity_mut() {
            assigned += assign_ids(e, ids)?;
        }
        Ok(())
    })?;
    Ok(assigned)
}

/// Recompute content hashes bottom-up: embedded entities first, so each
/// entity's hash covers the sealed hashes of what it embeds. `known` supplies
/// hashes of entities referenced by id only.
pub fn seal_hashes(
    root: &mut Entity,
    known: &HashMap<EntityId, ContentHash>,
    calc: &HashCalculator,
) -> GraphResult<()> {
    for_each_ref_mut(&mut root.props, &mut |r| {
        if let Some(e) = r.entity_mut() {
            seal_hashes(e, known, calc)?;
        }
        Ok(())
    })?;
    root.hash = Some(calc.entity_hash(root, known));
    Ok(())
}

/// Flatten the graph into persist order: `root` first, then every embedded
/// entity pre-order, each identified entity at most once.
pub fn collect(root: &Entity) -> Vec<&Entity> {
    let mut seen: HashSet<EntityId> = root.id.into_iter().collect();
    let mut out = vec![root];
    collect_into(root, &mut seen, &mut out);
    out
}

fn collect_into<'a>(entity: &'a Entity, seen: &mut HashSet<EntityId>, out: &mut Vec<&'a Entity>) {
    for nested in embedded(entity) {
        if let Some(id) = nested.id {
            if !seen.insert(id) {
                continue;
            }
        }
        out.push(nested);
        collect_into(nested, seen, out);
    }
}

/// Ids of every entity embedded in the graph, `root` included.
pub fn embedded_ids(root: &Entity) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    collect(root)
        .into_iter()
        .filter_map(|e| e.id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Entities referenced by id only, anywhere in the graph.
pub fn external_refs(root: &Entity) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entity in collect(root) {
        for_each_ref(&entity.props, &mut |r| {
            if let EntityRef::Id(id) = r {
                if seen.insert(*id) {
                    out.push(*id);
                }
            }
        });
    }
    out
}

/// Distinct entity types in the graph, in discovery order.
pub fn distinct_types(root: &Entity) -> Vec<TypeRef> {
    let mut seen = HashSet::new();
    collect(root)
        .into_iter()
        .map(|e| e.type_ref)
        .filter(|t| seen.insert(*t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eav_types::TypeDescriptor;

    fn order_type() -> TypeDescriptor {
        TypeDescriptor::named("shop::Order")
    }

    fn customer_type() -> TypeDescriptor {
        TypeDescriptor::named("crm::Customer")
    }

    fn customer(name: &str) -> Entity {
        Entity::new(
            TypeRef::new("crm::Customer", customer_type),
            Record::new().with("Name", name),
        )
    }

    fn order(props: Record) -> Entity {
        Entity::new(TypeRef::new("shop::Order", order_type), props)
    }

    fn ids(from: i64) -> impl Iterator<Item = EntityId> {
        (from..).map(EntityId::new)
    }

    #[test]
    fn ids_assigned_preorder() {
        let mut root = order(
            Record::new()
                .with("Buyer", EntityRef::to(customer("a")))
                .with("Peers", Value::array([EntityRef::to(customer("b"))])),
        );
        assert_eq!(count_unidentified(&root), 3);
        let n = assign_ids(&mut root, &mut ids(10)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(root.id, Some(EntityId::new(10)));
        assert_eq!(count_unidentified(&root), 0);
        let flat: Vec<i64> = collect(&root).iter().map(|e| e.id.unwrap().get()).collect();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0], 10);
    }

    #[test]
    fn exhausted_ids_reported() {
        let mut root = order(Record::new().with("Buyer", EntityRef::to(customer("a"))));
        let err = assign_ids(&mut root, &mut ids(1).take(1)).unwrap_err();
        assert!(matches!(err, GraphError::IdsExhausted));
    }

    #[test]
    fn diamond_collects_shared_entity_once() {
        let shared = customer("shared").with_id(EntityId::new(5));
        let root = order(
            Record::new()
                .with("Buyer", EntityRef::to(shared.clone()))
                .with(
                    "Billing",
                    Record::new().with("Payer", EntityRef::to(shared)),
                ),
        )
        .with_id(EntityId::new(1));
        let flat = collect(&root);
        assert_eq!(flat.len(), 2);
        assert_eq!(embedded_ids(&root), vec![EntityId::new(1), EntityId::new(5)]);
    }

    #[test]
    fn new_entities_are_never_merged() {
        let root = order(
            Record::new()
                .with("A", EntityRef::to(customer("x")))
                .with("B", EntityRef::to(customer("x"))),
        );
        assert_eq!(collect(&root).len(), 3);
    }

    #[test]
    fn root_reference_back_is_skipped() {
        let back = order(Record::new()).with_id(EntityId::new(1));
        let root = order(Record::new().with("Parent", EntityRef::to(back))).with_id(EntityId::new(1));
        assert_eq!(collect(&root).len(), 1);
    }

    #[test]
    fn external_refs_found_in_dictionaries() {
        let root = order(Record::new().with(
            "ByRegion",
            Value::dictionary([("eu", EntityRef::Id(EntityId::new(7)))]),
        ));
        assert_eq!(external_refs(&root), vec![EntityId::new(7)]);
    }

    #[test]
    fn sealing_propagates_child_changes() {
        let calc = HashCalculator::new();
        let known = HashMap::new();
        let mut a = order(Record::new().with("Buyer", EntityRef::to(customer("a"))));
        let mut b = order(Record::new().with("Buyer", EntityRef::to(customer("b"))));
        seal_hashes(&mut a, &known, &calc).unwrap();
        seal_hashes(&mut b, &known, &calc).unwrap();
        assert_ne!(a.hash, b.hash);
        let child = collect(&a)[1];
        assert!(child.hash.is_some());
    }

    #[test]
    fn distinct_types_in_discovery_order() {
        let root = order(
            Record::new()
                .with("A", EntityRef::to(customer("x")))
                .with("B", EntityRef::to(customer("y"))),
        );
        let types: Vec<&str> = distinct_types(&root).iter().map(|t| t.name()).collect();
        assert_eq!(types, vec!["shop::Order", "crm::Customer"]);
    }
}

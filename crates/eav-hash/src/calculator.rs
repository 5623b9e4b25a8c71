//! Content hashes of entities, composite values and collections.
//!
//! Values are fed into BLAKE3 through a tagged, length-prefixed canonical
//! encoding. Arrays hash in element order; dictionaries hash in key order, so
//! their hash does not depend on insertion order.

use std::collections::{BTreeMap, HashMap};

use eav_types::{ContentHash, DictKey, Entity, EntityHeader, EntityId, EntityRef, Record, Value};

use crate::hasher::ContentHasher;

/// Source of content hashes for referenced entities.
pub trait RefHashes {
    /// Current hash of the referenced entity, if known.
    fn ref_hash(&self, reference: &EntityRef) -> Option<ContentHash>;
}

/// Resolves embedded entities by their sealed hash and nothing else.
pub struct NoRefs;

impl RefHashes for NoRefs {
    fn ref_hash(&self, reference: &EntityRef) -> Option<ContentHash> {
        reference.entity().and_then(|e| e.hash)
    }
}

impl RefHashes for HashMap<EntityId, ContentHash> {
    fn ref_hash(&self, reference: &EntityRef) -> Option<ContentHash> {
        match reference {
            EntityRef::Entity(e) => e.hash.or_else(|| e.id.and_then(|id| self.get(&id).copied())),
            EntityRef::Id(id) => self.get(id).copied(),
        }
    }
}

/// Stateless calculator for every hash the engine persists.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashCalculator;

impl HashCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Hash of an entity: its type, the content-bearing header columns, and
    /// the recursively-hashed payload. Bookkeeping columns (owner, modifier,
    /// creation and modification dates) are excluded.
    pub fn entity_hash(&self, entity: &Entity, refs: &dyn RefHashes) -> ContentHash {
        let mut h = ContentHasher::ENTITY.start();
        feed_str(&mut h, entity.type_ref.name());
        feed_header(&mut h, &entity.header);
        feed_record(&mut h, &entity.props, refs);
        finish(h)
    }

    /// Hash of a nested composite value.
    pub fn composite_hash(&self, record: &Record, refs: &dyn RefHashes) -> ContentHash {
        let mut h = ContentHasher::COMPOSITE.start();
        feed_record(&mut h, record, refs);
        finish(h)
    }

    /// Hash of an array container.
    ///
    /// Arrays whose elements are all references combine each element's own
    /// hash in order, so a changed referenced entity changes the container
    /// hash without re-encoding its siblings. Other arrays hash their
    /// canonical encoding.
    pub fn array_hash(&self, items: &[Value], refs: &dyn RefHashes) -> ContentHash {
        if is_reference_collection(items.iter()) {
            let mut h = ContentHasher::REFERENCES.start();
            feed_len(&mut h, items.len());
            for item in items {
                h.update(self.reference_element_hash(item, refs).as_bytes());
            }
            return finish(h);
        }
        let mut h = ContentHasher::COLLECTION.start();
        feed_value(&mut h, &Value::Array(items.to_vec()), refs);
        finish(h)
    }

    /// Hash of a dictionary container. Same rule as [`Self::array_hash`],
    /// with entries visited in key order.
    pub fn dictionary_hash(
        &self,
        entries: &BTreeMap<DictKey, Value>,
        refs: &dyn RefHashes,
    ) -> ContentHash {
        if is_reference_collection(entries.values()) {
            let mut h = ContentHasher::REFERENCES.start();
            feed_len(&mut h, entries.len());
            for (key, item) in entries {
                feed_key(&mut h, key);
                h.update(self.reference_element_hash(item, refs).as_bytes());
            }
            return finish(h);
        }
        let mut h = ContentHasher::COLLECTION.start();
        h.update(&[TAG_DICTIONARY]);
        feed_len(&mut h, entries.len());
        for (key, item) in entries {
            feed_key(&mut h, key);
            feed_value(&mut h, item, refs);
        }
        finish(h)
    }

    /// Hash of a single reference element (entity or list item).
    pub fn reference_element_hash(&self, value: &Value, refs: &dyn RefHashes) -> ContentHash {
        let mut h = ContentHasher::REFERENCES.start();
        feed_value(&mut h, value, refs);
        finish(h)
    }
}

fn is_reference_collection<'a>(mut items: impl Iterator<Item = &'a Value>) -> bool {
    let mut any = false;
    let all = items.all(|v| match v {
        Value::Ref(_) | Value::ListItem(_) => {
            any = true;
            true
        }
        Value::Null => true,
        _ => false,
    });
    all && any
}

const TAG_NULL: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_NUMERIC: u8 = 4;
const TAG_BOOL: u8 = 5;
const TAG_DATETIME: u8 = 6;
const TAG_GUID: u8 = 7;
const TAG_BYTES: u8 = 8;
const TAG_REF_HASH: u8 = 9;
const TAG_REF_ID: u8 = 10;
const TAG_LIST_ITEM: u8 = 11;
const TAG_COMPOSITE: u8 = 12;
const TAG_ARRAY: u8 = 13;
const TAG_DICTIONARY: u8 = 14;
const TAG_ABSENT: u8 = 15;

fn finish(h: blake3::Hasher) -> ContentHash {
    ContentHash::from_hash(*h.finalize().as_bytes())
}

fn feed_len(h: &mut blake3::Hasher, len: usize) {
    h.update(&(len as u64).to_le_bytes());
}

fn feed_str(h: &mut blake3::Hasher, s: &str) {
    feed_len(h, s.len());
    h.update(s.as_bytes());
}

fn feed_opt<T>(h: &mut blake3::Hasher, value: Option<T>, f: impl FnOnce(&mut blake3::Hasher, T)) {
    match value {
        Some(v) => {
            h.update(&[1]);
            f(h, v);
        }
        None => {
            h.update(&[TAG_ABSENT]);
        }
    }
}

fn feed_header(h: &mut blake3::Hasher, header: &EntityHeader) {
    feed_opt(h, header.parent_id, |h, id| {
        h.update(&id.get().to_le_bytes());
    });
    feed_opt(h, header.name.as_deref(), feed_str);
    feed_opt(h, header.note.as_deref(), feed_str);
    feed_opt(h, header.date_begin, |h, d| {
        h.update(&d.timestamp_micros().to_le_bytes());
    });
    feed_opt(h, header.date_complete, |h, d| {
        h.update(&d.timestamp_micros().to_le_bytes());
    });
    let s = &header.shortcuts;
    feed_opt(h, s.key, |h, v| {
        h.update(&v.to_le_bytes());
    });
    feed_opt(h, s.value_long, |h, v| {
        h.update(&v.to_le_bytes());
    });
    feed_opt(h, s.value_string.as_deref(), feed_str);
    feed_opt(h, s.value_guid, |h, v| {
        h.update(v.as_bytes());
    });
    feed_opt(h, s.value_bool, |h, v| {
        h.update(&[v as u8]);
    });
    feed_opt(h, s.value_double, |h, v| {
        h.update(&v.to_bits().to_le_bytes());
    });
    feed_opt(h, s.value_numeric, |h, v| {
        h.update(&v.units().to_le_bytes());
        h.update(&v.scale().to_le_bytes());
    });
    feed_opt(h, s.value_datetime, |h, v| {
        h.update(&v.timestamp().to_le_bytes());
        h.update(&v.timestamp_subsec_nanos().to_le_bytes());
        h.update(&v.offset().local_minus_utc().to_le_bytes());
    });
    feed_opt(h, s.value_bytes.as_deref(), |h, v| {
        feed_len(h, v.len());
        h.update(v);
    });
}

/// Null fields are skipped: an absent field and an explicit null hash alike.
fn feed_record(h: &mut blake3::Hasher, record: &Record, refs: &dyn RefHashes) {
    h.update(&[TAG_COMPOSITE]);
    let present: Vec<(&String, &Value)> = record.iter().filter(|(_, v)| !v.is_null()).collect();
    feed_len(h, present.len());
    for (name, value) in present {
        feed_str(h, name);
        feed_value(h, value, refs);
    }
}

fn feed_key(h: &mut blake3::Hasher, key: &DictKey) {
    h.update(&[key.kind() as u8]);
    feed_str(h, &key.to_index());
}

fn feed_value(h: &mut blake3::Hasher, value: &Value, refs: &dyn RefHashes) {
    match value {
        Value::Null => {
            h.update(&[TAG_NULL]);
        }
        Value::String(s) => {
            h.update(&[TAG_STRING]);
            feed_str(h, s);
        }
        Value::Long(n) => {
            h.update(&[TAG_LONG]);
            h.update(&n.to_le_bytes());
        }
        Value::Double(d) => {
            h.update(&[TAG_DOUBLE]);
            h.update(&d.to_bits().to_le_bytes());
        }
        Value::Numeric(n) => {
            h.update(&[TAG_NUMERIC]);
            h.update(&n.units().to_le_bytes());
            h.update(&n.scale().to_le_bytes());
        }
        Value::Bool(b) => {
            h.update(&[TAG_BOOL, *b as u8]);
        }
        Value::DateTime(dt) => {
            h.update(&[TAG_DATETIME]);
            h.update(&dt.timestamp().to_le_bytes());
            h.update(&dt.timestamp_subsec_nanos().to_le_bytes());
            h.update(&dt.offset().local_minus_utc().to_le_bytes());
        }
        Value::Guid(g) => {
            h.update(&[TAG_GUID]);
            h.update(g.as_bytes());
        }
        Value::Bytes(b) => {
            h.update(&[TAG_BYTES]);
            feed_len(h, b.len());
            h.update(b);
        }
        Value::Ref(r) => match refs.ref_hash(r) {
            Some(hash) => {
                h.update(&[TAG_REF_HASH]);
                h.update(hash.as_bytes());
            }
            None => {
                h.update(&[TAG_REF_ID]);
                h.update(&r.id().map(|id| id.get()).unwrap_or(-1).to_le_bytes());
            }
        },
        Value::ListItem(id) => {
            h.update(&[TAG_LIST_ITEM]);
            h.update(&id.get().to_le_bytes());
        }
        Value::Composite(record) => feed_record(h, record, refs),
        Value::Array(items) => {
            h.update(&[TAG_ARRAY]);
            feed_len(h, items.len());
            for item in items {
                feed_value(h, item, refs);
            }
        }
        Value::Dictionary(entries) => {
            h.update(&[TAG_DICTIONARY]);
            feed_len(h, entries.len());
            for (key, item) in entries {
                feed_key(h, key);
                feed_value(h, item, refs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eav_types::{ListItemId, Numeric, TypeDescriptor, TypeRef};
    use proptest::prelude::*;

    fn order() -> TypeDescriptor {
        TypeDescriptor::named("shop::Order")
    }

    fn entity(props: Record) -> Entity {
        Entity::new(TypeRef::new("shop::Order", order), props)
    }

    fn hash_of(props: Record) -> ContentHash {
        HashCalculator::new().entity_hash(&entity(props), &NoRefs)
    }

    #[test]
    fn equal_payloads_hash_equal() {
        let a = Record::new().with("Total", Numeric::from_i64(10));
        let b = Record::new().with("Total", Numeric::from_i64(10));
        assert_eq!(hash_of(a), hash_of(b));
    }

    #[test]
    fn leaf_change_changes_hash() {
        let a = Record::new().with("Sku", "A").with("Qty", 1i64);
        let b = Record::new().with("Sku", "A").with("Qty", 2i64);
        assert_ne!(hash_of(a), hash_of(b));
    }

    #[test]
    fn array_order_matters() {
        let a = Record::new().with("Tags", Value::array(["x", "y"]));
        let b = Record::new().with("Tags", Value::array(["y", "x"]));
        assert_ne!(hash_of(a), hash_of(b));
    }

    #[test]
    fn dictionary_insertion_order_does_not_matter() {
        let mut first = BTreeMap::new();
        first.insert(DictKey::Long(1), Value::from("a"));
        first.insert(DictKey::Long(2), Value::from("b"));
        let mut second = BTreeMap::new();
        second.insert(DictKey::Long(2), Value::from("b"));
        second.insert(DictKey::Long(1), Value::from("a"));
        let calc = HashCalculator::new();
        assert_eq!(
            calc.dictionary_hash(&first, &NoRefs),
            calc.dictionary_hash(&second, &NoRefs)
        );
    }

    #[test]
    fn explicit_null_equals_absent_field() {
        let a = Record::new().with("Sku", "A").with("Note", Value::Null);
        let b = Record::new().with("Sku", "A");
        assert_eq!(hash_of(a), hash_of(b));
    }

    #[test]
    fn bookkeeping_columns_are_ignored() {
        let mut a = entity(Record::new().with("Sku", "A"));
        let mut b = a.clone();
        a.header.date_modify = Some(chrono::Utc::now());
        b.header.owner_id = Some(eav_types::UserId::new(4));
        let calc = HashCalculator::new();
        assert_eq!(calc.entity_hash(&a, &NoRefs), calc.entity_hash(&b, &NoRefs));
    }

    #[test]
    fn header_name_is_content() {
        let a = entity(Record::new()).with_name("one");
        let b = entity(Record::new()).with_name("two");
        let calc = HashCalculator::new();
        assert_ne!(calc.entity_hash(&a, &NoRefs), calc.entity_hash(&b, &NoRefs));
    }

    #[test]
    fn replacing_referenced_entity_changes_hash() {
        let mut known = HashMap::new();
        known.insert(EntityId::new(1), ContentHash::from_bytes(b"one"));
        known.insert(EntityId::new(2), ContentHash::from_bytes(b"two"));
        let calc = HashCalculator::new();
        let a = entity(Record::new().with("Customer", EntityRef::Id(EntityId::new(1))));
        let b = entity(Record::new().with("Customer", EntityRef::Id(EntityId::new(2))));
        assert_ne!(calc.entity_hash(&a, &known), calc.entity_hash(&b, &known));
    }

    #[test]
    fn referenced_entity_content_change_propagates() {
        let calc = HashCalculator::new();
        let mut known = HashMap::new();
        known.insert(EntityId::new(1), ContentHash::from_bytes(b"v1"));
        let e = entity(Record::new().with("Customer", EntityRef::Id(EntityId::new(1))));
        let before = calc.entity_hash(&e, &known);
        known.insert(EntityId::new(1), ContentHash::from_bytes(b"v2"));
        assert_ne!(before, calc.entity_hash(&e, &known));
    }

    #[test]
    fn reference_arrays_combine_element_hashes() {
        let calc = HashCalculator::new();
        let items = vec![
            Value::Ref(EntityRef::Id(EntityId::new(1))),
            Value::ListItem(ListItemId::new(7)),
        ];
        let mut known = HashMap::new();
        known.insert(EntityId::new(1), ContentHash::from_bytes(b"a"));
        let before = calc.array_hash(&items, &known);
        known.insert(EntityId::new(1), ContentHash::from_bytes(b"b"));
        assert_ne!(before, calc.array_hash(&items, &known));
    }

    #[test]
    fn composite_and_entity_domains_differ() {
        let record = Record::new().with("Sku", "A");
        let calc = HashCalculator::new();
        assert_ne!(
            calc.composite_hash(&record, &NoRefs),
            calc.entity_hash(&entity(record.clone()), &NoRefs)
        );
    }

    proptest! {
        #[test]
        fn any_array_element_change_is_detected(
            items in proptest::collection::vec(any::<i64>(), 1..16),
            idx in any::<prop::sample::Index>(),
            delta in 1i64..1000,
        ) {
            let calc = HashCalculator::new();
            let before: Vec<Value> = items.iter().copied().map(Value::Long).collect();
            let mut after = before.clone();
            let i = idx.index(items.len());
            after[i] = Value::Long(items[i].wrapping_add(delta));
            prop_assert_ne!(calc.array_hash(&before, &NoRefs), calc.array_hash(&after, &NoRefs));
        }
    }
}

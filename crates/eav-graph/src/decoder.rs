//! Rebuilds an entity payload from its value rows.

use std::collections::{BTreeMap, HashMap};

use eav_schema::{ElementKind, StructureKind, StructureNode, StructureTree};
use eav_store::{ValueData, ValueRow};
use eav_types::{DictKey, EntityRef, Record, StructureId, TypeError, Value, ValueId};

use crate::error::{GraphError, GraphResult};

/// Decode one entity's value rows into its payload.
///
/// Every structure of the tree appears in the result; structures without a
/// row decode to [`Value::Null`]. References decode to [`EntityRef::Id`].
pub fn decode_record(rows: &[ValueRow], tree: &StructureTree) -> GraphResult<Record> {
    let mut by_parent: HashMap<Option<ValueId>, Vec<&ValueRow>> = HashMap::new();
    for row in rows {
        if tree.node(row.structure_id).is_none() {
            return Err(GraphError::UnknownStructure {
                value: row.id,
                structure: row.structure_id,
            });
        }
        by_parent.entry(row.array_parent_id).or_default().push(row);
    }
    Decoder { tree, by_parent }.scope(None, None)
}

struct Decoder<'a> {
    tree: &'a StructureTree,
    by_parent: HashMap<Option<ValueId>, Vec<&'a ValueRow>>,
}

impl<'a> Decoder<'a> {
    fn rows_of(&self, parent: Option<ValueId>, structure: StructureId) -> Vec<&'a ValueRow> {
        self.by_parent
            .get(&parent)
            .map(|rows| {
                rows.iter()
                    .copied()
                    .filter(|r| r.structure_id == structure)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn scope(&self, parent: Option<StructureId>, parent_row: Option<ValueId>) -> GraphResult<Record> {
        let mut record = Record::new();
        for node in self.tree.children(parent) {
            let own = self.rows_of(parent_row, node.id());
            let value = match (node.kind, own.first()) {
                (_, None) => Value::Null,
                (StructureKind::Array(element), Some(container)) => {
                    let mut items = Vec::new();
                    for row in self.rows_of(Some(container.id), node.id()) {
                        items.push((array_position(row)?, self.single(node, element, row)?));
                    }
                    items.sort_by_key(|(pos, _)| *pos);
                    Value::Array(items.into_iter().map(|(_, v)| v).collect())
                }
                (StructureKind::Dictionary { key, value: element }, Some(container)) => {
                    let mut entries = BTreeMap::new();
                    for row in self.rows_of(Some(container.id), node.id()) {
                        let raw = row.array_index.as_deref().unwrap_or_default();
                        entries.insert(DictKey::parse(raw, key)?, self.single(node, element, row)?);
                    }
                    Value::Dictionary(entries)
                }
                (kind, Some(row)) => self.single(node, kind.element(), row)?,
            };
            record.set(node.name(), value);
        }
        Ok(record)
    }

    fn single(&self, node: &StructureNode, element: ElementKind, row: &ValueRow) -> GraphResult<Value> {
        let value = match (&row.data, element) {
            (ValueData::Null, _) => Value::Null,
            (ValueData::Container, ElementKind::Composite) => {
                Value::Composite(self.scope(Some(node.id()), Some(row.id))?)
            }
            (ValueData::Object(id), ElementKind::Reference) => Value::Ref(EntityRef::Id(*id)),
            (ValueData::ListItem(id), ElementKind::ListItem) => Value::ListItem(*id),
            (data, ElementKind::Scalar(kind)) => {
                let value = scalar_value(data);
                if value.scalar_kind() != Some(kind) {
                    return Err(self.mismatch(node, &kind.to_string(), &value));
                }
                value
            }
            (data, expected) => {
                return Err(self.mismatch(node, &format!("{expected:?}"), &scalar_value(data)));
            }
        };
        Ok(value)
    }

    fn mismatch(&self, node: &StructureNode, expected: &str, found: &Value) -> GraphError {
        GraphError::ShapeMismatch {
            field: self.tree.path_of(node.id()).join("."),
            expected: expected.to_string(),
            found: found.kind_name().to_string(),
        }
    }
}

fn array_position(row: &ValueRow) -> GraphResult<usize> {
    let raw = row.array_index.as_deref().unwrap_or_default();
    raw.parse().map_err(|_| {
        GraphError::Type(TypeError::InvalidKey {
            raw: raw.to_string(),
            kind: "array index".into(),
        })
    })
}

/// The native value held by a typed column. Containers read as null.
pub fn scalar_value(data: &ValueData) -> Value {
    match data {
        ValueData::Null | ValueData::Container => Value::Null,
        ValueData::String(v) => Value::String(v.clone()),
        ValueData::Long(v) => Value::Long(*v),
        ValueData::Double(v) => Value::Double(*v),
        ValueData::Numeric(v) => Value::Numeric(*v),
        ValueData::Boolean(v) => Value::Bool(*v),
        ValueData::DateTimeOffset(v) => Value::DateTime(*v),
        ValueData::Guid(v) => Value::Guid(*v),
        ValueData::ByteArray(v) => Value::Bytes(v.clone()),
        ValueData::Object(id) => Value::Ref(EntityRef::Id(*id)),
        ValueData::ListItem(id) => Value::ListItem(*id),
    }
}

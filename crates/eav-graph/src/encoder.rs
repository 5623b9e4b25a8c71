//! Structure-tree driven value encoding.
//!
//! [`ValueEncoder`] walks an entity's payload alongside its scheme's
//! [`StructureTree`] and emits one [`ValueRow`] per stored value. Absent and
//! null fields emit nothing unless the structure stores nulls. Containers
//! (composites, arrays, dictionaries) get a row of their own that element
//! and child rows point at through `array_parent_id`.
//!
//! Row ids are provisional: negative and unique within one
//! [`EncodedBatch`], so they never collide with stored rows. The caller swaps
//! in real ids with [`EncodedBatch::assign_ids`] once it knows how many rows
//! it will actually insert.

use std::collections::HashMap;

use eav_hash::{HashCalculator, RefHashes};
use eav_schema::{ElementKind, StructureKind, StructureNode, StructureTree};
use eav_store::{ValueData, ValueRow};
use eav_types::{
    ContentHash, DictKey, Entity, EntityId, ScalarKind, StructureId, Value, ValueId,
};

use crate::error::{GraphError, GraphResult};

/// Encoded value rows of one save batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedBatch {
    pub rows: Vec<ValueRow>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows owned by one entity.
    pub fn for_object(&self, id: EntityId) -> impl Iterator<Item = &ValueRow> {
        self.rows.iter().filter(move |r| r.object_id == id)
    }

    /// Replace provisional ids with `ids`, rewriting parent links to match.
    pub fn assign_ids(&mut self, ids: &[i64]) -> GraphResult<()> {
        if ids.len() < self.rows.len() {
            return Err(GraphError::IdsExhausted);
        }
        let map: HashMap<ValueId, ValueId> = self
            .rows
            .iter()
            .zip(ids)
            .map(|(row, id)| (row.id, ValueId::new(*id)))
            .collect();
        for row in &mut self.rows {
            if let Some(id) = map.get(&row.id) {
                row.id = *id;
            }
            if let Some(parent) = row.array_parent_id {
                row.array_parent_id = Some(map.get(&parent).copied().unwrap_or(parent));
            }
        }
        Ok(())
    }

    pub fn into_rows(self) -> Vec<ValueRow> {
        self.rows
    }
}

struct Scope<'a> {
    object: EntityId,
    tree: &'a StructureTree,
}

/// Encodes entity payloads into value rows.
pub struct ValueEncoder<'r> {
    refs: &'r dyn RefHashes,
    calc: HashCalculator,
    max_depth: usize,
    next: i64,
    rows: Vec<ValueRow>,
}

impl<'r> ValueEncoder<'r> {
    /// `refs` resolves the hashes stored on reference rows; `max_depth`
    /// bounds composite nesting in the data.
    pub fn new(refs: &'r dyn RefHashes, max_depth: usize) -> Self {
        Self {
            refs,
            calc: HashCalculator::new(),
            max_depth,
            next: -1,
            rows: Vec::new(),
        }
    }

    /// Append the rows of one entity. The entity must have an id.
    pub fn encode(&mut self, entity: &Entity, tree: &StructureTree) -> GraphResult<usize> {
        let object = entity
            .id
            .ok_or_else(|| GraphError::UnresolvedReference(entity.type_ref.name().to_string()))?;
        let before = self.rows.len();
        let scope = Scope { object, tree };
        self.encode_scope(&scope, None, &entity.props, None, 0)?;
        Ok(self.rows.len() - before)
    }

    pub fn finish(self) -> EncodedBatch {
        EncodedBatch { rows: self.rows }
    }

    fn encode_scope(
        &mut self,
        scope: &Scope<'_>,
        parent: Option<StructureId>,
        record: &eav_types::Record,
        parent_row: Option<ValueId>,
        depth: usize,
    ) -> GraphResult<()> {
        for node in scope.tree.children(parent) {
            let value = record.get(node.name()).unwrap_or(&Value::Null);
            self.encode_field(scope, node, value, parent_row, depth)?;
        }
        Ok(())
    }

    fn encode_field(
        &mut self,
        scope: &Scope<'_>,
        node: &StructureNode,
        value: &Value,
        parent_row: Option<ValueId>,
        depth: usize,
    ) -> GraphResult<()> {
        if value.is_null() {
            if node.row.required {
                return Err(GraphError::MissingRequired(field_path(scope, node)));
            }
            if node.row.store_null {
                self.push(scope, node, ValueData::Null, None, parent_row, None);
            }
            return Ok(());
        }

        match node.kind {
            StructureKind::Array(element) => {
                let Value::Array(items) = value else {
                    return Err(mismatch(scope, node, "array", value));
                };
                let container = self.push(scope, node, ValueData::Container, None, parent_row, None);
                for (i, item) in items.iter().enumerate() {
                    self.encode_element(scope, node, element, item, container, i.to_string(), depth)?;
                }
                let hash = self.calc.array_hash(items, self.refs);
                self.set_hash(container, hash);
            }
            StructureKind::Dictionary { key, value: element } => {
                let Value::Dictionary(entries) = value else {
                    return Err(mismatch(scope, node, "dictionary", value));
                };
                let container = self.push(scope, node, ValueData::Container, None, parent_row, None);
                for (k, item) in entries {
                    check_key(scope, node, key, k)?;
                    self.encode_element(scope, node, element, item, container, k.to_index(), depth)?;
                }
                let hash = self.calc.dictionary_hash(entries, self.refs);
                self.set_hash(container, hash);
            }
            single => {
                self.encode_single(scope, node, single.element(), value, parent_row, None, depth)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_element(
        &mut self,
        scope: &Scope<'_>,
        node: &StructureNode,
        element: ElementKind,
        item: &Value,
        container: ValueId,
        index: String,
        depth: usize,
    ) -> GraphResult<()> {
        if item.is_null() {
            // Keeps positions stable.
            self.push(scope, node, ValueData::Null, None, Some(container), Some(index));
            return Ok(());
        }
        self.encode_single(scope, node, element, item, Some(container), Some(index), depth)
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_single(
        &mut self,
        scope: &Scope<'_>,
        node: &StructureNode,
        element: ElementKind,
        value: &Value,
        parent_row: Option<ValueId>,
        index: Option<String>,
        depth: usize,
    ) -> GraphResult<()> {
        match element {
            ElementKind::Scalar(kind) => {
                let data = scalar_data(kind, value).ok_or_else(|| {
                    mismatch(scope, node, &kind.to_string(), value)
                })?;
                self.push(scope, node, data, None, parent_row, index);
            }
            ElementKind::Reference => {
                let Value::Ref(r) = value else {
                    return Err(mismatch(scope, node, "reference", value));
                };
                let target = r
                    .id()
                    .ok_or_else(|| GraphError::UnresolvedReference(field_path(scope, node)))?;
                let hash = self.refs.ref_hash(r);
                self.push(scope, node, ValueData::Object(target), hash, parent_row, index);
            }
            ElementKind::ListItem => {
                let Value::ListItem(item) = value else {
                    return Err(mismatch(scope, node, "listitem", value));
                };
                self.push(scope, node, ValueData::ListItem(*item), None, parent_row, index);
            }
            ElementKind::Composite => {
                let Value::Composite(record) = value else {
                    return Err(mismatch(scope, node, "composite", value));
                };
                if depth >= self.max_depth {
                    return Err(GraphError::DepthExceeded {
                        field: field_path(scope, node),
                        max_depth: self.max_depth,
                    });
                }
                let hash = self.calc.composite_hash(record, self.refs);
                let container =
                    self.push(scope, node, ValueData::Container, Some(hash), parent_row, index);
                self.encode_scope(scope, Some(node.id()), record, Some(container), depth + 1)?;
            }
        }
        Ok(())
    }

    fn push(
        &mut self,
        scope: &Scope<'_>,
        node: &StructureNode,
        data: ValueData,
        hash: Option<ContentHash>,
        parent_row: Option<ValueId>,
        index: Option<String>,
    ) -> ValueId {
        let id = ValueId::new(self.next);
        self.next -= 1;
        self.rows.push(ValueRow {
            id,
            object_id: scope.object,
            structure_id: node.id(),
            data,
            hash,
            array_parent_id: parent_row,
            array_index: index,
        });
        id
    }

    fn set_hash(&mut self, id: ValueId, hash: ContentHash) {
        if let Some(row) = self.rows.iter_mut().rev().find(|r| r.id == id) {
            row.hash = Some(hash);
        }
    }
}

/// The typed column for a scalar value, if the value has the given kind.
pub fn scalar_data(kind: ScalarKind, value: &Value) -> Option<ValueData> {
    let data = match (kind, value) {
        (ScalarKind::String, Value::String(v)) => ValueData::String(v.clone()),
        (ScalarKind::Long, Value::Long(v)) => ValueData::Long(*v),
        (ScalarKind::Double, Value::Double(v)) => ValueData::Double(*v),
        (ScalarKind::Numeric, Value::Numeric(v)) => ValueData::Numeric(*v),
        (ScalarKind::Bool, Value::Bool(v)) => ValueData::Boolean(*v),
        (ScalarKind::DateTime, Value::DateTime(v)) => ValueData::DateTimeOffset(*v),
        (ScalarKind::Guid, Value::Guid(v)) => ValueData::Guid(*v),
        (ScalarKind::Bytes, Value::Bytes(v)) => ValueData::ByteArray(v.clone()),
        _ => return None,
    };
    Some(data)
}

fn check_key(
    scope: &Scope<'_>,
    node: &StructureNode,
    expected: ScalarKind,
    key: &DictKey,
) -> GraphResult<()> {
    if key.kind() == expected {
        Ok(())
    } else {
        Err(GraphError::ShapeMismatch {
            field: field_path(scope, node),
            expected: format!("{expected} key"),
            found: format!("{} key", key.kind()),
        })
    }
}

fn field_path(scope: &Scope<'_>, node: &StructureNode) -> String {
    scope.tree.path_of(node.id()).join(".")
}

fn mismatch(scope: &Scope<'_>, node: &StructureNode, expected: &str, found: &Value) -> GraphError {
    GraphError::ShapeMismatch {
        field: field_path(scope, node),
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

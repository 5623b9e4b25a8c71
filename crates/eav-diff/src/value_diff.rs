//! Value-level diff: compare an entity's stored value rows with freshly
//! encoded ones and produce the minimal set of row writes.
//!
//! Rows are matched by slot, `(structure_id, array_index)`, under matched
//! parents, starting from the entity's root scope. Arrays are therefore
//! compared position by position and dictionaries key by key. Containers
//! with equal hashes are skipped without descending; leaves compare by
//! their typed column and hash.

use std::collections::HashMap;

use tracing::debug;

use eav_store::ValueRow;
use eav_types::{EntityId, StructureId, ValueId};

use crate::error::{DiffError, DiffResult};

/// Row writes that turn the stored rows into the encoded ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueChanges {
    /// New rows with provisional ids. Parent links point either at other
    /// inserted rows or at stored containers.
    pub inserted: Vec<ValueRow>,
    /// Leaf rows whose column or hash changed, under their stored id.
    pub updated: Vec<ValueRow>,
    /// Containers whose hash changed, under their stored id.
    pub rehashed: Vec<ValueRow>,
    /// Stored rows to remove, children before their containers.
    pub deleted: Vec<ValueId>,
}

impl ValueChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if no row needs writing.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.rehashed.is_empty()
            && self.deleted.is_empty()
    }

    /// Append another entity's changes.
    pub fn extend(&mut self, other: ValueChanges) {
        self.inserted.extend(other.inserted);
        self.updated.extend(other.updated);
        self.rehashed.extend(other.rehashed);
        self.deleted.extend(other.deleted);
    }

    /// Replace the provisional ids of inserted rows with `ids`. Links to
    /// stored containers are left alone.
    pub fn assign_insert_ids(&mut self, ids: &[i64]) -> DiffResult<()> {
        if ids.len() < self.inserted.len() {
            return Err(DiffError::NotEnoughIds {
                needed: self.inserted.len(),
                given: ids.len(),
            });
        }
        let map: HashMap<ValueId, ValueId> = self
            .inserted
            .iter()
            .zip(ids)
            .map(|(row, id)| (row.id, ValueId::new(*id)))
            .collect();
        for row in &mut self.inserted {
            if let Some(id) = map.get(&row.id) {
                row.id = *id;
            }
            if let Some(parent) = row.array_parent_id {
                if let Some(real) = map.get(&parent) {
                    row.array_parent_id = Some(*real);
                }
            }
        }
        Ok(())
    }
}

type Slot = (StructureId, Option<String>);

fn slot(row: &ValueRow) -> Slot {
    (row.structure_id, row.array_index.clone())
}

fn index_rows(
    object: EntityId,
    rows: &[ValueRow],
) -> DiffResult<HashMap<Option<ValueId>, Vec<&ValueRow>>> {
    let mut by_parent: HashMap<Option<ValueId>, Vec<&ValueRow>> = HashMap::new();
    for row in rows {
        if row.object_id != object {
            return Err(DiffError::MixedObjects {
                expected: object,
                found: row.object_id,
            });
        }
        let siblings = by_parent.entry(row.array_parent_id).or_default();
        if siblings.iter().any(|s| slot(s) == slot(row)) {
            return Err(DiffError::DuplicateSlot {
                parent: row.array_parent_id,
                structure: row.structure_id,
                index: row.array_index.clone(),
            });
        }
        siblings.push(row);
    }
    Ok(by_parent)
}

/// Diff one entity's stored rows against its encoded rows.
pub fn diff_entity_values(
    object: EntityId,
    old: &[ValueRow],
    new: &[ValueRow],
) -> DiffResult<ValueChanges> {
    let mut differ = Differ {
        old: index_rows(object, old)?,
        new: index_rows(object, new)?,
        changes: ValueChanges::new(),
    };
    differ.level(None, None);
    let changes = differ.changes;
    debug!(
        object = %object,
        inserted = changes.inserted.len(),
        updated = changes.updated.len(),
        rehashed = changes.rehashed.len(),
        deleted = changes.deleted.len(),
        "diffed value rows"
    );
    Ok(changes)
}

struct Differ<'a> {
    old: HashMap<Option<ValueId>, Vec<&'a ValueRow>>,
    new: HashMap<Option<ValueId>, Vec<&'a ValueRow>>,
    changes: ValueChanges,
}

impl<'a> Differ<'a> {
    fn level(&mut self, old_parent: Option<ValueId>, new_parent: Option<ValueId>) {
        let old_rows = self.old.get(&old_parent).cloned().unwrap_or_default();
        let new_rows = self.new.get(&new_parent).cloned().unwrap_or_default();
        let mut unmatched: HashMap<Slot, &'a ValueRow> =
            old_rows.iter().map(|r| (slot(r), *r)).collect();

        for new in new_rows {
            match unmatched.remove(&slot(new)) {
                None => self.insert_subtree(new, old_parent),
                Some(old) => self.compare(old, new),
            }
        }

        let mut stale: Vec<&ValueRow> = unmatched.into_values().collect();
        stale.sort_by_key(|r| r.id);
        for old in stale {
            self.delete_subtree(old);
        }
    }

    fn compare(&mut self, old: &'a ValueRow, new: &'a ValueRow) {
        match (old.is_container(), new.is_container()) {
            (true, true) => {
                if old.hash.is_some() && old.hash == new.hash {
                    return;
                }
                self.changes.rehashed.push(adopt(old, new));
                self.level(Some(old.id), Some(new.id));
            }
            (false, false) => {
                if old.data != new.data || old.hash != new.hash {
                    self.changes.updated.push(adopt(old, new));
                }
            }
            _ => {
                self.delete_subtree(old);
                self.insert_subtree(new, old.array_parent_id);
            }
        }
    }

    fn insert_subtree(&mut self, root: &'a ValueRow, parent: Option<ValueId>) {
        let mut top = root.clone();
        top.array_parent_id = parent;
        self.changes.inserted.push(top);
        let mut stack: Vec<&ValueRow> = self.children_new(root.id).into_iter().rev().collect();
        while let Some(row) = stack.pop() {
            self.changes.inserted.push(row.clone());
            stack.extend(self.children_new(row.id).into_iter().rev());
        }
    }

    fn delete_subtree(&mut self, root: &'a ValueRow) {
        let children = self.old.get(&Some(root.id)).cloned().unwrap_or_default();
        for child in children {
            self.delete_subtree(child);
        }
        self.changes.deleted.push(root.id);
    }

    fn children_new(&self, id: ValueId) -> Vec<&'a ValueRow> {
        self.new.get(&Some(id)).cloned().unwrap_or_default()
    }
}

/// The encoded row under the stored row's identity.
fn adopt(old: &ValueRow, new: &ValueRow) -> ValueRow {
    ValueRow {
        id: old.id,
        array_parent_id: old.array_parent_id,
        ..new.clone()
    }
}

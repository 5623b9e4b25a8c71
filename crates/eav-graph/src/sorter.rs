//! Dependency ordering of value rows.
//!
//! Backends enforce `array_parent_id` as a self-referencing foreign key and
//! insert a batch in one statement, so every container row must precede the
//! rows pointing at it. [`sort_by_dependency`] is a breadth-first
//! topological sort over the parent links: rows without a parent in the
//! batch come first, then their children tier by tier, keeping input order
//! within a tier.

use std::collections::{HashMap, HashSet, VecDeque};

use eav_store::ValueRow;
use eav_types::ValueId;

use crate::error::{GraphError, GraphResult};

/// Order rows so that each container precedes its dependents.
///
/// A parent link pointing outside the batch (an already-stored container)
/// imposes no ordering. A cycle among the batch's parent links is an error.
pub fn sort_by_dependency(rows: Vec<ValueRow>) -> GraphResult<Vec<ValueRow>> {
    let ids: HashSet<ValueId> = rows.iter().map(|r| r.id).collect();
    let mut children: HashMap<ValueId, Vec<usize>> = HashMap::new();
    let mut queue = VecDeque::new();
    for (i, row) in rows.iter().enumerate() {
        match row.array_parent_id {
            Some(parent) if ids.contains(&parent) && parent != row.id => {
                children.entry(parent).or_default().push(i);
            }
            Some(parent) if parent == row.id => return Err(GraphError::DependencyCycle(row.id)),
            _ => queue.push_back(i),
        }
    }

    let mut order = Vec::with_capacity(rows.len());
    let mut placed = vec![false; rows.len()];
    while let Some(i) = queue.pop_front() {
        order.push(i);
        placed[i] = true;
        if let Some(kids) = children.remove(&rows[i].id) {
            queue.extend(kids);
        }
    }

    if let Some(stuck) = placed.iter().position(|p| !p) {
        return Err(GraphError::DependencyCycle(rows[stuck].id));
    }

    let mut slots: Vec<Option<ValueRow>> = rows.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eav_store::ValueData;
    use eav_types::{EntityId, StructureId};
    use proptest::prelude::*;

    fn row(id: i64, parent: Option<i64>) -> ValueRow {
        ValueRow {
            id: ValueId::new(id),
            object_id: EntityId::new(1),
            structure_id: StructureId::new(1),
            data: ValueData::Container,
            hash: None,
            array_parent_id: parent.map(ValueId::new),
            array_index: None,
        }
    }

    fn positions(rows: &[ValueRow]) -> HashMap<ValueId, usize> {
        rows.iter().enumerate().map(|(i, r)| (r.id, i)).collect()
    }

    #[test]
    fn parents_precede_children() {
        let sorted = sort_by_dependency(vec![row(3, Some(2)), row(2, Some(1)), row(1, None)]).unwrap();
        let ids: Vec<i64> = sorted.iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn roots_keep_input_order() {
        let sorted =
            sort_by_dependency(vec![row(5, None), row(9, Some(5)), row(4, None), row(1, None)])
                .unwrap();
        let ids: Vec<i64> = sorted.iter().map(|r| r.id.get()).collect();
        assert_eq!(ids, vec![5, 4, 1, 9]);
    }

    #[test]
    fn external_parent_counts_as_root() {
        let sorted = sort_by_dependency(vec![row(2, Some(77)), row(3, Some(2))]).unwrap();
        assert_eq!(sorted[0].id, ValueId::new(2));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = sort_by_dependency(vec![row(1, Some(2)), row(2, Some(1))]).unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle(_)));
        let err = sort_by_dependency(vec![row(1, Some(1))]).unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle(_)));
    }

    #[test]
    fn cycle_names_its_first_row() {
        let rows = vec![row(1, None), row(2, Some(3)), row(3, Some(2)), row(4, Some(1))];
        let err = sort_by_dependency(rows).unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle(id) if id == ValueId::new(2)));
    }

    fn forest() -> impl Strategy<Value = Vec<ValueRow>> {
        prop::collection::vec((any::<bool>(), any::<prop::sample::Index>()), 1..64)
            .prop_map(|edges| {
                edges.iter()
                    .enumerate()
                    .map(|(i, (root, pick))| {
                        let parent = if *root || i == 0 {
                            None
                        } else {
                            Some(pick.index(i) as i64 + 1)
                        };
                        row(i as i64 + 1, parent)
                    })
                    .collect::<Vec<_>>()
            })
            .prop_shuffle()
    }

    proptest! {
        #[test]
        fn containers_always_come_first(rows in forest()) {
            let n = rows.len();
            let sorted = sort_by_dependency(rows).unwrap();
            prop_assert_eq!(sorted.len(), n);
            let pos = positions(&sorted);
            for r in &sorted {
                if let Some(parent) = r.array_parent_id {
                    prop_assert!(pos[&parent] < pos[&r.id]);
                }
            }
        }
    }
}

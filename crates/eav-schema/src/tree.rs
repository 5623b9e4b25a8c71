//! In-memory structure tree of one scheme.
//!
//! [`StructureTree`] indexes a scheme's structure rows by id and keeps a
//! child index per node, so the encoder and decoder walk the tree level by
//! level instead of matching fields against a flat list. Sibling subtrees
//! may therefore reuse field names freely.
//!
//! # Invariants
//!
//! - Every parent reference resolves to a structure of the same scheme.
//! - Children are ordered by `(order, id)`.
//! - Every node has a resolved [`StructureKind`].

use std::collections::HashMap;

use eav_store::{CollectionKind, StructureRow};
use eav_types::{ScalarKind, SchemeId, StorageKind, StructureId, TypeCatalog};

use crate::error::{SchemaError, SchemaResult};

/// Kind of a single stored element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Scalar(ScalarKind),
    Reference,
    ListItem,
    Composite,
}

impl From<StorageKind> for ElementKind {
    fn from(kind: StorageKind) -> Self {
        match kind {
            StorageKind::Scalar(k) => Self::Scalar(k),
            StorageKind::Class => Self::Composite,
            StorageKind::Reference => Self::Reference,
            StorageKind::ListItem => Self::ListItem,
        }
    }
}

/// Closed set of structure kinds the encoder dispatches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StructureKind {
    Scalar(ScalarKind),
    Reference,
    ListItem,
    Composite,
    Array(ElementKind),
    Dictionary { key: ScalarKind, value: ElementKind },
}

impl StructureKind {
    /// Kind of each stored element.
    pub fn element(&self) -> ElementKind {
        match self {
            Self::Scalar(k) => ElementKind::Scalar(*k),
            Self::Reference => ElementKind::Reference,
            Self::ListItem => ElementKind::ListItem,
            Self::Composite => ElementKind::Composite,
            Self::Array(e) => *e,
            Self::Dictionary { value, .. } => *value,
        }
    }

    /// Whether the structure's row is a container other rows point at.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Composite | Self::Array(_) | Self::Dictionary { .. })
    }

    /// Whether child structures hang below this node.
    pub fn has_children(&self) -> bool {
        self.element() == ElementKind::Composite
    }

    fn single(element: ElementKind) -> Self {
        match element {
            ElementKind::Scalar(k) => Self::Scalar(k),
            ElementKind::Reference => Self::Reference,
            ElementKind::ListItem => Self::ListItem,
            ElementKind::Composite => Self::Composite,
        }
    }

    /// Resolve the kind of a persisted structure row.
    pub fn of_row(row: &StructureRow, catalog: &TypeCatalog) -> SchemaResult<Self> {
        let element = ElementKind::from(catalog.kind_of(row.type_id)?);
        match row.collection {
            CollectionKind::None => Ok(Self::single(element)),
            CollectionKind::Array => Ok(Self::Array(element)),
            CollectionKind::Dictionary => {
                let key_type = row.key_type.ok_or_else(|| SchemaError::UnsupportedFieldType {
                    field: row.name.clone(),
                    reason: "dictionary structure without key type".into(),
                })?;
                match catalog.kind_of(key_type)? {
                    StorageKind::Scalar(key) if key.is_key_kind() => {
                        Ok(Self::Dictionary { key, value: element })
                    }
                    other => Err(SchemaError::UnsupportedFieldType {
                        field: row.name.clone(),
                        reason: format!("{other} cannot be a dictionary key"),
                    }),
                }
            }
        }
    }
}

/// One node of a [`StructureTree`].
#[derive(Clone, Debug, PartialEq)]
pub struct StructureNode {
    pub row: StructureRow,
    pub kind: StructureKind,
    children: Vec<StructureId>,
}

impl StructureNode {
    pub fn id(&self) -> StructureId {
        self.row.id
    }

    pub fn name(&self) -> &str {
        &self.row.name
    }

    /// Child structure ids in order.
    pub fn child_ids(&self) -> &[StructureId] {
        &self.children
    }
}

/// The structure tree of one scheme.
#[derive(Clone, Debug, PartialEq)]
pub struct StructureTree {
    scheme_id: SchemeId,
    nodes: HashMap<StructureId, StructureNode>,
    roots: Vec<StructureId>,
}

impl StructureTree {
    /// Build the tree from a scheme's structure rows.
    pub fn build(
        scheme_id: SchemeId,
        rows: Vec<StructureRow>,
        catalog: &TypeCatalog,
    ) -> SchemaResult<Self> {
        let mut nodes = HashMap::with_capacity(rows.len());
        for row in rows.into_iter().filter(|r| r.scheme_id == scheme_id) {
            let kind = StructureKind::of_row(&row, catalog)?;
            nodes.insert(
                row.id,
                StructureNode {
                    row,
                    kind,
                    children: Vec::new(),
                },
            );
        }

        let mut roots = Vec::new();
        let mut edges: Vec<(StructureId, StructureId)> = Vec::new();
        for node in nodes.values() {
            match node.row.parent_id {
                None => roots.push(node.id()),
                Some(parent) if nodes.contains_key(&parent) => edges.push((parent, node.id())),
                Some(parent) => {
                    return Err(SchemaError::DanglingStructure {
                        id: node.id(),
                        parent,
                    })
                }
            }
        }
        for (parent, child) in edges {
            if let Some(p) = nodes.get_mut(&parent) {
                p.children.push(child);
            }
        }

        let sort_key = |nodes: &HashMap<StructureId, StructureNode>, id: &StructureId| {
            nodes.get(id).map(|n| (n.row.order, n.id()))
        };
        roots.sort_by_key(|id| sort_key(&nodes, id));
        let ids: Vec<StructureId> = nodes.keys().copied().collect();
        for id in ids {
            let mut children = nodes.get(&id).map(|n| n.children.clone()).unwrap_or_default();
            children.sort_by_key(|c| sort_key(&nodes, c));
            if let Some(node) = nodes.get_mut(&id) {
                node.children = children;
            }
        }

        Ok(Self {
            scheme_id,
            nodes,
            roots,
        })
    }

    pub fn scheme_id(&self) -> SchemeId {
        self.scheme_id
    }

    /// Total number of structures.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: StructureId) -> Option<&StructureNode> {
        self.nodes.get(&id)
    }

    /// Root fields in order.
    pub fn roots(&self) -> Vec<&StructureNode> {
        self.resolve(&self.roots)
    }

    /// Children of `parent`, or the roots when `parent` is `None`.
    pub fn children(&self, parent: Option<StructureId>) -> Vec<&StructureNode> {
        match parent {
            None => self.roots(),
            Some(id) => self
                .nodes
                .get(&id)
                .map(|n| self.resolve(&n.children))
                .unwrap_or_default(),
        }
    }

    /// The child of `parent` named `name`.
    pub fn child_named(&self, parent: Option<StructureId>, name: &str) -> Option<&StructureNode> {
        self.children(parent).into_iter().find(|n| n.name() == name)
    }

    /// A node together with all of its descendants, pre-order.
    pub fn find_subtree(&self, id: StructureId) -> Vec<&StructureNode> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                out.push(node);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// The node at a field path such as `["Lines", "Sku"]`.
    pub fn find_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&StructureNode> {
        let mut parent = None;
        let mut found = None;
        for segment in path {
            let node = self.child_named(parent, segment.as_ref())?;
            parent = Some(node.id());
            found = Some(node);
        }
        found
    }

    /// Field names from the root down to `id`.
    pub fn path_of(&self, id: StructureId) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(&id);
        while let Some(node) = current {
            path.push(node.name());
            current = node.row.parent_id.and_then(|p| self.nodes.get(&p));
        }
        path.reverse();
        path
    }

    /// Every node, pre-order from the roots.
    pub fn iter(&self) -> impl Iterator<Item = &StructureNode> {
        self.roots.iter().flat_map(|root| self.find_subtree(*root))
    }

    fn resolve(&self, ids: &[StructureId]) -> Vec<&StructureNode> {
        ids.iter().filter_map(|id| self.nodes.get(id)).collect()
    }
}

//! The type catalog: semantic storage kinds and their column mapping.
//!
//! The catalog is read-only at runtime. Backends persist it in the `types`
//! table; [`TypeCatalog::builtin`] provides the canonical entries used to seed
//! a fresh store.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};
use crate::ids::StorageTypeId;

/// Native scalar kinds that map onto a single typed value column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarKind {
    String,
    Long,
    Double,
    Numeric,
    Bool,
    DateTime,
    Guid,
    Bytes,
}

impl ScalarKind {
    /// All scalar kinds.
    pub const ALL: [ScalarKind; 8] = [
        ScalarKind::String,
        ScalarKind::Long,
        ScalarKind::Double,
        ScalarKind::Numeric,
        ScalarKind::Bool,
        ScalarKind::DateTime,
        ScalarKind::Guid,
        ScalarKind::Bytes,
    ];

    /// Whether values of this kind may be used as dictionary keys.
    pub fn is_key_kind(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Long | Self::Guid | Self::Bool | Self::DateTime
        )
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Double => "double",
            Self::Numeric => "numeric",
            Self::Bool => "bool",
            Self::DateTime => "datetime",
            Self::Guid => "guid",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// The storage column a catalog entry maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    String,
    Long,
    Double,
    Numeric,
    Boolean,
    DateTimeOffset,
    Guid,
    ByteArray,
    /// Container row for a nested composite value.
    Class,
    /// `values.object` reference column.
    Object,
    /// `values.listitem` reference column.
    ListItem,
}

/// Semantic storage kind of a structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Scalar(ScalarKind),
    Class,
    Reference,
    ListItem,
}

impl DbType {
    /// The semantic kind stored in this column.
    pub fn kind(&self) -> StorageKind {
        match self {
            Self::String => StorageKind::Scalar(ScalarKind::String),
            Self::Long => StorageKind::Scalar(ScalarKind::Long),
            Self::Double => StorageKind::Scalar(ScalarKind::Double),
            Self::Numeric => StorageKind::Scalar(ScalarKind::Numeric),
            Self::Boolean => StorageKind::Scalar(ScalarKind::Bool),
            Self::DateTimeOffset => StorageKind::Scalar(ScalarKind::DateTime),
            Self::Guid => StorageKind::Scalar(ScalarKind::Guid),
            Self::ByteArray => StorageKind::Scalar(ScalarKind::Bytes),
            Self::Class => StorageKind::Class,
            Self::Object => StorageKind::Reference,
            Self::ListItem => StorageKind::ListItem,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => write!(f, "{kind}"),
            Self::Class => f.write_str("class"),
            Self::Reference => f.write_str("object"),
            Self::ListItem => f.write_str("listitem"),
        }
    }
}

/// One row of the `types` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub id: StorageTypeId,
    pub name: String,
    pub db_type: DbType,
    pub native_type_name: String,
}

impl TypeEntry {
    fn new(id: i64, name: &str, db_type: DbType, native: &str) -> Self {
        Self {
            id: StorageTypeId::new(id),
            name: name.to_string(),
            db_type,
            native_type_name: native.to_string(),
        }
    }
}

/// Lookup tables between storage type ids and semantic kinds.
#[derive(Clone, Debug)]
pub struct TypeCatalog {
    entries: Vec<TypeEntry>,
    by_id: HashMap<StorageTypeId, StorageKind>,
    by_kind: HashMap<StorageKind, StorageTypeId>,
}

impl TypeCatalog {
    /// The canonical catalog entries.
    pub fn builtin_entries() -> Vec<TypeEntry> {
        vec![
            TypeEntry::new(1, "String", DbType::String, "String"),
            TypeEntry::new(2, "Long", DbType::Long, "i64"),
            TypeEntry::new(3, "Double", DbType::Double, "f64"),
            TypeEntry::new(4, "Numeric", DbType::Numeric, "Numeric"),
            TypeEntry::new(5, "Boolean", DbType::Boolean, "bool"),
            TypeEntry::new(6, "DateTime", DbType::DateTimeOffset, "DateTime<FixedOffset>"),
            TypeEntry::new(7, "Guid", DbType::Guid, "Uuid"),
            TypeEntry::new(8, "Bytes", DbType::ByteArray, "Vec<u8>"),
            TypeEntry::new(9, "Class", DbType::Class, "Record"),
            TypeEntry::new(10, "Object", DbType::Object, "EntityRef"),
            TypeEntry::new(11, "ListItem", DbType::ListItem, "ListItemId"),
        ]
    }

    /// The canonical catalog.
    pub fn builtin() -> Self {
        Self::index(Self::builtin_entries())
    }

    /// Build a catalog from persisted entries.
    ///
    /// Fails if any semantic kind has no entry. When several entries map to
    /// the same kind, the lowest id wins.
    pub fn from_entries(entries: Vec<TypeEntry>) -> TypeResult<Self> {
        let catalog = Self::index(entries);
        let required = ScalarKind::ALL
            .iter()
            .map(|k| StorageKind::Scalar(*k))
            .chain([StorageKind::Class, StorageKind::Reference, StorageKind::ListItem]);
        for kind in required {
            if !catalog.by_kind.contains_key(&kind) {
                return Err(TypeError::IncompleteCatalog(kind.to_string()));
            }
        }
        Ok(catalog)
    }

    fn index(mut entries: Vec<TypeEntry>) -> Self {
        entries.sort_by_key(|e| e.id);
        let mut by_id = HashMap::new();
        let mut by_kind = HashMap::new();
        for entry in &entries {
            let kind = entry.db_type.kind();
            by_id.insert(entry.id, kind);
            by_kind.entry(kind).or_insert(entry.id);
        }
        Self {
            entries,
            by_id,
            by_kind,
        }
    }

    /// All entries, ordered by id.
    pub fn entries(&self) -> &[TypeEntry] {
        &self.entries
    }

    /// Semantic kind of a storage type id.
    pub fn kind_of(&self, id: StorageTypeId) -> TypeResult<StorageKind> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or(TypeError::UnknownStorageType(id.get()))
    }

    /// Storage type id for a semantic kind.
    pub fn id_of(&self, kind: StorageKind) -> TypeResult<StorageTypeId> {
        self.by_kind
            .get(&kind)
            .copied()
            .ok_or_else(|| TypeError::IncompleteCatalog(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_kind() {
        let catalog = TypeCatalog::builtin();
        assert_eq!(catalog.entries().len(), 11);
        for kind in ScalarKind::ALL {
            let id = catalog.id_of(StorageKind::Scalar(kind)).unwrap();
            assert_eq!(catalog.kind_of(id).unwrap(), StorageKind::Scalar(kind));
        }
        assert!(catalog.id_of(StorageKind::Reference).is_ok());
    }

    #[test]
    fn incomplete_catalog_rejected() {
        let mut entries = TypeCatalog::builtin_entries();
        entries.retain(|e| e.db_type != DbType::ListItem);
        let err = TypeCatalog::from_entries(entries).unwrap_err();
        assert_eq!(err, TypeError::IncompleteCatalog("listitem".into()));
    }

    #[test]
    fn unknown_id_is_error() {
        let catalog = TypeCatalog::builtin();
        assert_eq!(
            catalog.kind_of(StorageTypeId::new(999)).unwrap_err(),
            TypeError::UnknownStorageType(999)
        );
    }

    #[test]
    fn key_kinds() {
        assert!(ScalarKind::Long.is_key_kind());
        assert!(ScalarKind::Guid.is_key_kind());
        assert!(!ScalarKind::Double.is_key_kind());
        assert!(!ScalarKind::Bytes.is_key_kind());
    }
}

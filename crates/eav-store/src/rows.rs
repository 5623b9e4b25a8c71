//! Persisted relational rows.
//!
//! Column sets mirror the `schemes`, `structures`, `objects`, `values`,
//! `types` and purge-task tables.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eav_types::{
    ContentHash, EntityHeader, EntityId, ListItemId, Numeric, PurgeTaskId, SchemeId,
    StorageTypeId, StructureId, ValueId,
};

/// Scheme category (`schemes.type`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemeKind {
    /// Scheme synchronized from an application type.
    #[default]
    Object,
    /// Scheme backing the hierarchical navigation layer.
    Folder,
}

/// A row of the `schemes` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeRow {
    pub id: SchemeId,
    pub name: String,
    pub alias: Option<String>,
    pub kind: SchemeKind,
    pub structure_hash: Option<ContentHash>,
}

/// Collection kind of a structure (`structures.collection_type`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    #[default]
    None,
    Array,
    Dictionary,
}

/// A row of the `structures` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureRow {
    pub id: StructureId,
    pub scheme_id: SchemeId,
    /// `None` for root fields.
    pub parent_id: Option<StructureId>,
    pub name: String,
    pub alias: Option<String>,
    pub type_id: StorageTypeId,
    /// `allow_not_null`: the field is non-nullable.
    pub required: bool,
    pub collection: CollectionKind,
    /// Dictionary key type; dictionaries only.
    pub key_type: Option<StorageTypeId>,
    /// Explicit nulls still produce a value row.
    #[serde(default)]
    pub store_null: bool,
    pub order: i32,
}

/// A row of the `objects` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRow {
    pub id: EntityId,
    pub scheme_id: SchemeId,
    pub hash: Option<ContentHash>,
    pub header: EntityHeader,
}

/// The populated column of a value row.
///
/// Exactly one typed column, one reference column, or none (for containers
/// and explicit nulls) is populated; the enum makes mixing impossible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ValueData {
    /// Explicit null (structure stores nulls).
    Null,
    /// Composite, array or dictionary root; other rows point at it.
    Container,
    String(String),
    Long(i64),
    Double(f64),
    Numeric(Numeric),
    Boolean(bool),
    DateTimeOffset(DateTime<FixedOffset>),
    Guid(Uuid),
    ByteArray(Vec<u8>),
    Object(EntityId),
    ListItem(ListItemId),
}

/// A row of the `values` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueRow {
    pub id: ValueId,
    pub object_id: EntityId,
    pub structure_id: StructureId,
    pub data: ValueData,
    /// Content hash of container and reference rows.
    pub hash: Option<ContentHash>,
    /// Container row this row belongs to.
    pub array_parent_id: Option<ValueId>,
    /// Position (arrays) or serialized key (dictionaries).
    pub array_index: Option<String>,
}

impl ValueRow {
    /// Returns `true` for composite/array/dictionary container rows.
    pub fn is_container(&self) -> bool {
        matches!(self.data, ValueData::Container)
    }

    /// The referenced entity, if this is a reference row.
    pub fn referenced_object(&self) -> Option<EntityId> {
        match self.data {
            ValueData::Object(id) => Some(id),
            _ => None,
        }
    }
}

/// Lifecycle of a purge task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurgeStatus {
    /// Marked, not yet picked up by a worker.
    Pending,
    /// Claimed by a worker; `heartbeat` tracks liveness.
    Running,
    /// Stopped cooperatively between batches.
    Cancelled,
    Completed,
}

/// Persisted progress of a two-phase delete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeTaskRow {
    pub id: PurgeTaskId,
    /// Subtree roots passed to the mark call.
    pub roots: Vec<EntityId>,
    /// Entities still to delete, leaves first.
    pub pending: Vec<EntityId>,
    pub total: u64,
    pub processed: u64,
    pub status: PurgeStatus,
    pub worker: Option<String>,
    pub heartbeat: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

impl PurgeTaskRow {
    /// Whether the task was abandoned and may be claimed by a new worker.
    pub fn is_orphaned(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        match self.status {
            PurgeStatus::Pending => true,
            PurgeStatus::Running => now - self.heartbeat > stale_after,
            PurgeStatus::Cancelled | PurgeStatus::Completed => false,
        }
    }
}

/// Optional backend features.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Value-level updates and reads inside a transaction.
    pub change_tracking: bool,
    /// Server-side nested graph projection for eager loads.
    pub graph_projection: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            change_tracking: true,
            graph_projection: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: PurgeStatus, heartbeat: DateTime<Utc>) -> PurgeTaskRow {
        PurgeTaskRow {
            id: PurgeTaskId::new(1),
            roots: vec![],
            pending: vec![],
            total: 0,
            processed: 0,
            status,
            worker: None,
            heartbeat,
            created: heartbeat,
        }
    }

    #[test]
    fn orphan_detection() {
        let now = Utc::now();
        let stale = chrono::Duration::seconds(60);
        assert!(task(PurgeStatus::Pending, now).is_orphaned(now, stale));
        assert!(!task(PurgeStatus::Running, now).is_orphaned(now, stale));
        let old = now - chrono::Duration::seconds(120);
        assert!(task(PurgeStatus::Running, old).is_orphaned(now, stale));
        assert!(!task(PurgeStatus::Completed, old).is_orphaned(now, stale));
    }

    #[test]
    fn value_row_roles() {
        let row = ValueRow {
            id: ValueId::new(1),
            object_id: EntityId::new(1),
            structure_id: StructureId::new(1),
            data: ValueData::Object(EntityId::new(9)),
            hash: None,
            array_parent_id: None,
            array_index: None,
        };
        assert!(!row.is_container());
        assert_eq!(row.referenced_object(), Some(EntityId::new(9)));
    }

    #[test]
    fn value_row_json_roundtrip() {
        let row = ValueRow {
            id: ValueId::new(3),
            object_id: EntityId::new(1),
            structure_id: StructureId::new(2),
            data: ValueData::Numeric("12.5".parse().unwrap()),
            hash: Some(ContentHash::from_bytes(b"h")),
            array_parent_id: Some(ValueId::new(2)),
            array_index: Some("0".into()),
        };
        let json = serde_json::to_value(&row).unwrap();
        let back: ValueRow = serde_json::from_value(json).unwrap();
        assert_eq!(back, row);
    }
}

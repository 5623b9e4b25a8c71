//! Entities ("objects") and references between them.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::{Persist, TypeRef};
use crate::error::TypeResult;
use crate::hash::ContentHash;
use crate::ids::{EntityId, SchemeId, UserId};
use crate::numeric::Numeric;
use crate::value::Record;

/// Denormalized scalar columns on the entity row, usable for filtering
/// without touching value rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Shortcuts {
    pub key: Option<i64>,
    pub value_long: Option<i64>,
    pub value_string: Option<String>,
    pub value_guid: Option<Uuid>,
    pub value_bool: Option<bool>,
    pub value_double: Option<f64>,
    pub value_numeric: Option<Numeric>,
    pub value_datetime: Option<DateTime<FixedOffset>>,
    pub value_bytes: Option<Vec<u8>>,
}

/// Entity-row columns other than identity, scheme and hash.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    /// Parent in the hierarchical object tree (not the structure tree).
    pub parent_id: Option<EntityId>,
    pub owner_id: Option<UserId>,
    pub who_change_id: Option<UserId>,
    pub name: Option<String>,
    pub note: Option<String>,
    pub date_create: Option<DateTime<Utc>>,
    pub date_modify: Option<DateTime<Utc>>,
    pub date_begin: Option<DateTime<Utc>>,
    pub date_complete: Option<DateTime<Utc>>,
    pub shortcuts: Shortcuts,
}

/// One persisted instance of an application type.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    /// `None` until the entity is first saved.
    pub id: Option<EntityId>,
    pub type_ref: TypeRef,
    pub scheme_id: Option<SchemeId>,
    pub header: EntityHeader,
    /// Content hash as of the last save or load.
    pub hash: Option<ContentHash>,
    pub props: Record,
}

impl Entity {
    /// A new, unsaved entity with the given payload.
    pub fn new(type_ref: TypeRef, props: Record) -> Self {
        Self {
            id: None,
            type_ref,
            scheme_id: None,
            header: EntityHeader::default(),
            hash: None,
            props,
        }
    }

    /// A new, unsaved entity built from a typed object.
    pub fn from_typed<T: Persist>(value: &T) -> Self {
        Self::new(TypeRef::of::<T>(), value.to_record())
    }

    /// Rebuild the typed object from the payload.
    pub fn to_typed<T: Persist>(&self) -> TypeResult<T> {
        T::from_record(&self.props)
    }

    /// Builder: set the id (for updates of known entities).
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.header.name = Some(name.into());
        self
    }

    /// Builder: set the hierarchical parent.
    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.header.parent_id = Some(parent);
        self
    }

    /// Returns `true` if the entity has never been saved.
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

/// A reference from one entity's payload to another entity.
#[derive(Clone, Debug, PartialEq)]
pub enum EntityRef {
    /// An already-persisted entity, by id.
    Id(EntityId),
    /// An embedded entity graph, saved together with the referencing entity.
    Entity(Box<Entity>),
}

impl EntityRef {
    /// Embed an entity.
    pub fn to(entity: Entity) -> Self {
        Self::Entity(Box::new(entity))
    }

    /// Id of the referenced entity, if known.
    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Entity(e) => e.id,
        }
    }

    /// The embedded entity, if any.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Id(_) => None,
            Self::Entity(e) => Some(e),
        }
    }

    /// The embedded entity, mutably.
    pub fn entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Self::Id(_) => None,
            Self::Entity(e) => Some(e),
        }
    }
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        Self::Id(id)
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        Self::to(entity)
    }
}

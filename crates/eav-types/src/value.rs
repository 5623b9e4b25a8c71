//! The native value model an entity's properties payload is made of.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ScalarKind;
use crate::descriptor::Persist;
use crate::entity::EntityRef;
use crate::error::{TypeError, TypeResult};
use crate::ids::ListItemId;
use crate::numeric::Numeric;

/// A live field value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Long(i64),
    Double(f64),
    Numeric(Numeric),
    Bool(bool),
    DateTime(DateTime<FixedOffset>),
    Guid(Uuid),
    Bytes(Vec<u8>),
    Ref(EntityRef),
    ListItem(ListItemId),
    Composite(Record),
    Array(Vec<Value>),
    Dictionary(BTreeMap<DictKey, Value>),
}

impl Value {
    /// Build an array value.
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// Build a dictionary value.
    pub fn dictionary<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<DictKey>,
        V: Into<Value>,
    {
        Self::Dictionary(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a composite value from a typed nested object.
    pub fn composite<T: Persist>(value: &T) -> Self {
        Self::Composite(value.to_record())
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The scalar kind of this value, if it is a scalar.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::String(_) => Some(ScalarKind::String),
            Self::Long(_) => Some(ScalarKind::Long),
            Self::Double(_) => Some(ScalarKind::Double),
            Self::Numeric(_) => Some(ScalarKind::Numeric),
            Self::Bool(_) => Some(ScalarKind::Bool),
            Self::DateTime(_) => Some(ScalarKind::DateTime),
            Self::Guid(_) => Some(ScalarKind::Guid),
            Self::Bytes(_) => Some(ScalarKind::Bytes),
            _ => None,
        }
    }

    /// Short name of the value's variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::String(_) => "string",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Numeric(_) => "numeric",
            Self::Bool(_) => "bool",
            Self::DateTime(_) => "datetime",
            Self::Guid(_) => "guid",
            Self::Bytes(_) => "bytes",
            Self::Ref(_) => "reference",
            Self::ListItem(_) => "listitem",
            Self::Composite(_) => "composite",
            Self::Array(_) => "array",
            Self::Dictionary(_) => "dictionary",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

value_from!(
    String => String,
    i64 => Long,
    f64 => Double,
    Numeric => Numeric,
    bool => Bool,
    DateTime<FixedOffset> => DateTime,
    Uuid => Guid,
    Vec<u8> => Bytes,
    EntityRef => Ref,
    ListItemId => ListItem,
    Record => Composite,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Long(v as i64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Extract a typed value from a [`Value`].
pub trait FromValue: Sized {
    fn from_value(field: &str, value: &Value) -> TypeResult<Self>;
}

fn mismatch(field: &str, expected: &str, found: &Value) -> TypeError {
    TypeError::FieldType {
        field: field.to_string(),
        expected: expected.to_string(),
        found: found.kind_name().to_string(),
    }
}

macro_rules! from_value {
    ($($ty:ty => $variant:ident as $name:literal),* $(,)?) => {
        $(impl FromValue for $ty {
            fn from_value(field: &str, value: &Value) -> TypeResult<Self> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    Value::Null => Err(TypeError::MissingField(field.to_string())),
                    other => Err(mismatch(field, $name, other)),
                }
            }
        })*
    };
}

from_value!(
    String => String as "string",
    i64 => Long as "long",
    f64 => Double as "double",
    Numeric => Numeric as "numeric",
    bool => Bool as "bool",
    DateTime<FixedOffset> => DateTime as "datetime",
    Uuid => Guid as "guid",
    Vec<u8> => Bytes as "bytes",
    EntityRef => Ref as "reference",
    ListItemId => ListItem as "listitem",
    Record => Composite as "composite",
);

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(field: &str, value: &Value) -> TypeResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(field, other).map(Some),
        }
    }
}

/// A dictionary key. Keys serialize to a deterministic, type-aware text form
/// so they can be stored in the `array_index` column and parsed back using the
/// structure's recorded key kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DictKey {
    String(String),
    Long(i64),
    Guid(Uuid),
    Bool(bool),
    DateTime(DateTime<FixedOffset>),
}

impl DictKey {
    /// The scalar kind of this key.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::String(_) => ScalarKind::String,
            Self::Long(_) => ScalarKind::Long,
            Self::Guid(_) => ScalarKind::Guid,
            Self::Bool(_) => ScalarKind::Bool,
            Self::DateTime(_) => ScalarKind::DateTime,
        }
    }

    /// Text form stored in the index column.
    pub fn to_index(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Long(n) => n.to_string(),
            Self::Guid(g) => g.hyphenated().to_string(),
            Self::Bool(b) => b.to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// Parse an index column back into a key of the given kind.
    pub fn parse(raw: &str, kind: ScalarKind) -> TypeResult<Self> {
        let invalid = || TypeError::InvalidKey {
            raw: raw.to_string(),
            kind: kind.to_string(),
        };
        match kind {
            ScalarKind::String => Ok(Self::String(raw.to_string())),
            ScalarKind::Long => raw.parse().map(Self::Long).map_err(|_| invalid()),
            ScalarKind::Guid => Uuid::parse_str(raw).map(Self::Guid).map_err(|_| invalid()),
            ScalarKind::Bool => raw.parse().map(Self::Bool).map_err(|_| invalid()),
            ScalarKind::DateTime => DateTime::parse_from_rfc3339(raw)
                .map(Self::DateTime)
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_index())
    }
}

impl From<&str> for DictKey {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for DictKey {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for DictKey {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<Uuid> for DictKey {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}

impl From<bool> for DictKey {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<DateTime<FixedOffset>> for DictKey {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Self::DateTime(v)
    }
}

/// An ordered set of named field values: an entity's properties payload or a
/// nested composite value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Raw field value. Absent fields read as `None`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Mutable raw field value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Typed field access. Absent fields behave like [`Value::Null`].
    pub fn field<T: FromValue>(&self, name: &str) -> TypeResult<T> {
        T::from_value(name, self.get(name).unwrap_or(&Value::Null))
    }

    /// Typed array access. An absent or null field yields an empty vector.
    pub fn array<T: FromValue>(&self, name: &str) -> TypeResult<Vec<T>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|v| T::from_value(name, v)).collect(),
            Some(other) => Err(mismatch(name, "array", other)),
        }
    }

    /// Typed dictionary access. An absent or null field yields an empty map.
    pub fn dictionary<T: FromValue>(&self, name: &str) -> TypeResult<BTreeMap<DictKey, T>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Dictionary(entries)) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_value(name, v)?)))
                .collect(),
            Some(other) => Err(mismatch(name, "dictionary", other)),
        }
    }

    /// Typed nested composite access.
    pub fn composite<T: Persist>(&self, name: &str) -> TypeResult<T> {
        let record: Record = self.field(name)?;
        T::from_record(&record)
    }

    /// Typed array-of-composites access.
    pub fn composites<T: Persist>(&self, name: &str) -> TypeResult<Vec<T>> {
        self.array::<Record>(name)?
            .iter()
            .map(T::from_record)
            .collect()
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    /// Iterate fields mutably in name order.
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, Value> {
        self.fields.iter_mut()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

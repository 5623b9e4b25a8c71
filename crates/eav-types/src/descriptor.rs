//! Compile-time type descriptors.
//!
//! Application types describe their persisted shape by implementing
//! [`Persist`]. The schema synchronizer and the value encoder consume the
//! resulting [`TypeDescriptor`]; nothing inspects live objects reflectively.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::catalog::ScalarKind;
use crate::error::TypeResult;
use crate::value::Record;

/// An application type that can be stored as an entity or as a nested
/// composite value.
pub trait Persist: Sized + Send + Sync + 'static {
    /// The persisted shape of this type.
    fn descriptor() -> TypeDescriptor;

    /// Convert a live object into its properties payload.
    fn to_record(&self) -> Record;

    /// Rebuild a live object from a properties payload.
    fn from_record(record: &Record) -> TypeResult<Self>;
}

/// A lazily-resolved handle to a type descriptor.
///
/// Descriptors are produced on demand so composite types may mention
/// themselves; the schema synchronizer rejects such cycles instead of
/// recursing forever.
#[derive(Clone, Copy)]
pub struct TypeRef {
    name: &'static str,
    resolve: fn() -> TypeDescriptor,
}

impl TypeRef {
    /// Handle for a [`Persist`] type.
    pub fn of<T: Persist>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            resolve: T::descriptor,
        }
    }

    /// Handle from an explicit name and resolver.
    pub const fn new(name: &'static str, resolve: fn() -> TypeDescriptor) -> Self {
        Self { name, resolve }
    }

    /// Fully-qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve the descriptor.
    pub fn descriptor(&self) -> TypeDescriptor {
        (self.resolve)()
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.name)
    }
}

/// The persisted shape of an application type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDescriptor {
    /// Fully-qualified name; becomes the scheme name.
    pub name: String,
    /// Optional display alias for the scheme.
    pub alias: Option<String>,
    /// Public fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Start a descriptor for `T`, named by its fully-qualified path.
    pub fn of<T: 'static>() -> Self {
        Self::named(std::any::type_name::<T>())
    }

    /// Start a descriptor with an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            fields: Vec::new(),
        }
    }

    /// Builder: set the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Builder: append a field.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// The last path segment of the name, used by legacy schemes.
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }
}

/// Last `::` segment of a type path, ignoring generic arguments.
pub fn short_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// How a field's values are typed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarKind),
    /// Reference to another entity, stored by id.
    Reference,
    /// Reference to an item of an external lookup list.
    ListItem,
    /// Nested composite value stored in place.
    Composite(TypeRef),
}

/// Collection shape of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldShape {
    Single(FieldType),
    Array(FieldType),
    Dictionary { key: ScalarKind, value: FieldType },
}

impl FieldShape {
    /// The element type, regardless of collection shape.
    pub fn element(&self) -> FieldType {
        match self {
            Self::Single(t) | Self::Array(t) => *t,
            Self::Dictionary { value, .. } => *value,
        }
    }
}

/// One public field of a described type.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub alias: Option<String>,
    pub shape: FieldShape,
    /// Non-nullable field.
    pub required: bool,
    /// Emit a row even when the value is null.
    pub store_null: bool,
}

impl FieldDescriptor {
    /// A field of arbitrary shape.
    pub fn new(name: impl Into<String>, shape: FieldShape) -> Self {
        Self {
            name: name.into(),
            alias: None,
            shape,
            required: false,
            store_null: false,
        }
    }

    /// A single scalar field.
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(name, FieldShape::Single(FieldType::Scalar(kind)))
    }

    /// A single entity-reference field.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, FieldShape::Single(FieldType::Reference))
    }

    /// A single list-item reference field.
    pub fn list_item(name: impl Into<String>) -> Self {
        Self::new(name, FieldShape::Single(FieldType::ListItem))
    }

    /// A nested composite field.
    pub fn composite<T: Persist>(name: impl Into<String>) -> Self {
        Self::new(name, FieldShape::Single(FieldType::Composite(TypeRef::of::<T>())))
    }

    /// An array field.
    pub fn array(name: impl Into<String>, element: FieldType) -> Self {
        Self::new(name, FieldShape::Array(element))
    }

    /// A dictionary field.
    pub fn dictionary(name: impl Into<String>, key: ScalarKind, value: FieldType) -> Self {
        Self::new(name, FieldShape::Dictionary { key, value })
    }

    /// Builder: mark non-nullable.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: persist explicit nulls.
    pub fn store_null(mut self) -> Self {
        self.store_null = true;
        self
    }

    /// Builder: set the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

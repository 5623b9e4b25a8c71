//! Persisted types and helpers shared by the engine tests.

use std::sync::Arc;

use eav_store::{BackendCapabilities, InMemoryBackend};
use eav_types::{
    EntityRef, FieldDescriptor, FieldType, Numeric, Persist, Record, ScalarKind, TypeDescriptor,
    TypeRef, TypeResult, Value,
};

use crate::config::EngineConfig;
use crate::engine::Engine;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Line {
    pub sku: String,
    pub qty: i64,
}

impl Persist for Line {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
            .field(FieldDescriptor::scalar("Sku", ScalarKind::String).required())
            .field(FieldDescriptor::scalar("Qty", ScalarKind::Long))
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("Sku", self.sku.as_str())
            .with("Qty", self.qty)
    }

    fn from_record(record: &Record) -> TypeResult<Self> {
        Ok(Self {
            sku: record.field("Sku")?,
            qty: record.field("Qty")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Customer {
    pub name: String,
}

impl Persist for Customer {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().field(FieldDescriptor::scalar("Name", ScalarKind::String))
    }

    fn to_record(&self) -> Record {
        Record::new().with("Name", self.name.as_str())
    }

    fn from_record(record: &Record) -> TypeResult<Self> {
        Ok(Self {
            name: record.field("Name")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Invoice {
    pub total: Numeric,
    pub lines: Vec<Line>,
    pub customer: Option<EntityRef>,
}

impl Persist for Invoice {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
            .field(FieldDescriptor::scalar("Total", ScalarKind::Numeric).required())
            .field(FieldDescriptor::array(
                "Lines",
                FieldType::Composite(TypeRef::of::<Line>()),
            ))
            .field(FieldDescriptor::reference("Customer"))
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("Total", self.total)
            .with(
                "Lines",
                Value::Array(self.lines.iter().map(Value::composite).collect()),
            )
            .with("Customer", self.customer.clone())
    }

    fn from_record(record: &Record) -> TypeResult<Self> {
        Ok(Self {
            total: record.field("Total")?,
            lines: record.composites("Lines")?,
            customer: record.field("Customer")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Address;

impl Persist for Address {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
            .field(FieldDescriptor::scalar("Street", ScalarKind::String))
            .field(FieldDescriptor::scalar("City", ScalarKind::String))
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_: &Record) -> TypeResult<Self> {
        Ok(Self)
    }
}

/// One field of every shape the engine stores.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Sample;

impl Persist for Sample {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>()
            .field(FieldDescriptor::scalar("Title", ScalarKind::String))
            .field(FieldDescriptor::scalar("Rating", ScalarKind::Double))
            .field(FieldDescriptor::scalar("Active", ScalarKind::Bool))
            .field(FieldDescriptor::scalar("Key", ScalarKind::Guid))
            .field(FieldDescriptor::scalar("Seen", ScalarKind::DateTime))
            .field(FieldDescriptor::scalar("Blob", ScalarKind::Bytes))
            .field(FieldDescriptor::array(
                "Tags",
                FieldType::Scalar(ScalarKind::String),
            ))
            .field(FieldDescriptor::dictionary(
                "Scores",
                ScalarKind::Long,
                FieldType::Scalar(ScalarKind::Double),
            ))
            .field(FieldDescriptor::composite::<Address>("Address"))
            .field(FieldDescriptor::array("Friends", FieldType::Reference))
            .field(FieldDescriptor::reference("Best"))
            .field(FieldDescriptor::composite::<Holder>("Holder"))
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_: &Record) -> TypeResult<Self> {
        Ok(Self)
    }
}

/// A composite holding a reference, for graphs reaching an entity twice.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Holder;

impl Persist for Holder {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().field(FieldDescriptor::reference("Target"))
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_: &Record) -> TypeResult<Self> {
        Ok(Self)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Folder;

impl Persist for Folder {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().field(FieldDescriptor::scalar("Name", ScalarKind::String))
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_: &Record) -> TypeResult<Self> {
        Ok(Self)
    }
}

/// Contains itself; never synchronizable.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Chain;

impl Persist for Chain {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::of::<Self>().field(FieldDescriptor::composite::<Chain>("Next"))
    }

    fn to_record(&self) -> Record {
        Record::new()
    }

    fn from_record(_: &Record) -> TypeResult<Self> {
        Ok(Self)
    }
}

pub(crate) fn numeric(s: &str) -> Numeric {
    s.parse().unwrap()
}

pub(crate) fn invoice(total: &str, lines: &[(&str, i64)], customer: Option<EntityRef>) -> Invoice {
    Invoice {
        total: numeric(total),
        lines: lines
            .iter()
            .map(|(sku, qty)| Line {
                sku: sku.to_string(),
                qty: *qty,
            })
            .collect(),
        customer,
    }
}

pub(crate) fn customer(name: &str) -> eav_types::Entity {
    eav_types::Entity::from_typed(&Customer {
        name: name.to_string(),
    })
}

pub(crate) fn config() -> EngineConfig {
    EngineConfig::default()
}

pub(crate) async fn engine_on(backend: &InMemoryBackend, config: EngineConfig) -> Engine {
    Engine::new(Arc::new(backend.clone()), config).await.unwrap()
}

pub(crate) async fn engine_with(config: EngineConfig) -> (Engine, InMemoryBackend) {
    let backend = InMemoryBackend::new();
    (engine_on(&backend, config).await, backend)
}

pub(crate) async fn engine() -> (Engine, InMemoryBackend) {
    engine_with(config()).await
}

pub(crate) async fn engine_without(
    capabilities: BackendCapabilities,
    config: EngineConfig,
) -> (Engine, InMemoryBackend) {
    let backend = InMemoryBackend::with_capabilities(capabilities);
    (engine_on(&backend, config).await, backend)
}

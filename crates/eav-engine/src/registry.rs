//! Scheme name to application type mapping, used to rebuild entities on load.

use std::collections::HashMap;
use std::sync::RwLock;

use eav_types::TypeRef;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<&'static str, TypeRef>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under its fully-qualified name. Returns `true` if it
    /// was not known before.
    pub fn register(&self, type_ref: TypeRef) -> EngineResult<bool> {
        let mut types = self
            .types
            .write()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        Ok(types.insert(type_ref.name(), type_ref).is_none())
    }

    /// The type stored under a scheme name.
    pub fn resolve(&self, scheme_name: &str) -> EngineResult<TypeRef> {
        let types = self
            .types
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        types
            .get(scheme_name)
            .copied()
            .ok_or_else(|| EngineError::UnregisteredType(scheme_name.to_string()))
    }

    pub fn len(&self) -> EngineResult<usize> {
        let types = self
            .types
            .read()
            .map_err(|e| EngineError::LockPoisoned(e.to_string()))?;
        Ok(types.len())
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::rows::{ObjectRow, ValueRow};

/// A fully nested entity graph as returned by a backend's server-side
/// projection: the entity row, its value rows, and the projections of every
/// entity it references that was not already emitted higher up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphProjection {
    pub object: ObjectRow,
    pub values: Vec<ValueRow>,
    #[serde(default)]
    pub references: Vec<GraphProjection>,
}

impl GraphProjection {
    /// Decode the backend's structured payload.
    pub fn from_json(payload: serde_json::Value) -> StoreResult<Self> {
        serde_json::from_value(payload).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Encode as a structured payload.
    pub fn to_json(&self) -> StoreResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Every projection in the graph, depth-first, this one first.
    pub fn flatten(&self) -> Vec<&GraphProjection> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.references.iter().rev());
        }
        out
    }
}

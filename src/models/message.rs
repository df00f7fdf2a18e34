use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HubError, Result};

/// Well-known message tags emitted by the synthetic producer
pub mod kind {
    pub const GRAPH: &str = "graph";
    pub const SPECTRUM: &str = "spectrum";
    pub const MAP: &str = "map";
}

/// A frame relayed by the hub.
///
/// `data` is carried as-is; the hub never looks inside it. Fields are private
/// so a message cannot change after construction and is shared as `Arc<Message>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    kind: String,
    data: Value,
}

impl Message {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Message carrying an ordered sequence of numbers
    pub fn series(kind: impl Into<String>, points: impl IntoIterator<Item = f64>) -> Self {
        let points: Vec<Value> = points.into_iter().map(Value::from).collect();
        Self::new(kind, Value::Array(points))
    }

    /// Message carrying named numeric fields
    pub fn fields(kind: impl Into<String>, fields: BTreeMap<String, f64>) -> Self {
        let map = fields
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();
        Self::new(kind, Value::Object(map))
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| HubError::Decode(e.to_string()))
    }

    /// Decode one inbound binary frame
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| HubError::Decode(e.to_string()))
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

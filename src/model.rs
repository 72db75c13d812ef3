use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A validated update request. `desired` is replaced wholesale once coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub device_id: String,
    pub desired: Map<String, Value>,
}

/// Wire payload sent to the twin store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TwinPatch {
    pub properties: TwinProperties,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TwinProperties {
    pub desired: Map<String, Value>,
}

impl TwinPatch {
    pub fn desired(desired: Map<String, Value>) -> Self {
        Self { properties: TwinProperties { desired } }
    }
}

/// A twin as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Twin {
    pub device_id: String,
    /// Opaque version tag required for the conditioned write.
    pub etag: String,
    pub document: Value,
}

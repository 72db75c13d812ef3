use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::StoreError;
use crate::model::{Twin, TwinPatch};
use crate::store::TwinStore;

/// In-process twin registry with etag-conditioned writes.
#[derive(Clone, Default)]
pub struct MemoryTwinStore {
    inner: Arc<RwLock<BTreeMap<String, Entry>>>,
}

struct Entry {
    version: u64,
    desired: Map<String, Value>,
}

impl Entry {
    fn etag(&self) -> String {
        format!("v{}", self.version)
    }
}

impl MemoryTwinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `device_id` with empty desired properties. No-op if it already exists.
    pub async fn register(&self, device_id: &str) {
        let mut twins = self.inner.write().await;
        if !twins.contains_key(device_id) {
            twins.insert(device_id.to_string(), Entry { version: 1, desired: Map::new() });
            info!(%device_id, "device registered");
        }
    }

    pub async fn desired(&self, device_id: &str) -> Option<Map<String, Value>> {
        self.inner.read().await.get(device_id).map(|e| e.desired.clone())
    }
}

#[async_trait]
impl TwinStore for MemoryTwinStore {
    async fn get_twin(&self, device_id: &str) -> Result<Twin, StoreError> {
        let twins = self.inner.read().await;
        let entry = twins
            .get(device_id)
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))?;
        Ok(Twin {
            device_id: device_id.to_string(),
            etag: entry.etag(),
            document: json!({
                "deviceId": device_id,
                "etag": entry.etag(),
                "version": entry.version,
                "properties": { "desired": entry.desired },
            }),
        })
    }

    async fn update_twin(&self, device_id: &str, patch: &TwinPatch, etag: &str) -> Result<(), StoreError> {
        let mut twins = self.inner.write().await;
        let entry = twins
            .get_mut(device_id)
            .ok_or_else(|| StoreError::NotFound(device_id.to_string()))?;
        if entry.etag() != etag {
            return Err(StoreError::Conflict(device_id.to_string()));
        }
        for (k, v) in &patch.properties.desired {
            if v.is_null() {
                entry.desired.remove(k);
            } else {
                entry.desired.insert(k.clone(), v.clone());
            }
        }
        entry.version += 1;
        Ok(())
    }
}

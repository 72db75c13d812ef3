use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{Config, StoreKind, CONNECTION_STRING_ENV};
use crate::error::{ConnectionStringError, StoreError};
use crate::model::{Twin, TwinPatch};

pub mod iothub;
pub mod memory;

pub use iothub::{ConnectionString, IotHubRegistry};
pub use memory::MemoryTwinStore;

/// Remote registry holding device twins.
#[async_trait]
pub trait TwinStore: Send + Sync {
    async fn get_twin(&self, device_id: &str) -> Result<Twin, StoreError>;

    /// Applies `patch` only if the twin's current etag still equals `etag`.
    async fn update_twin(&self, device_id: &str, patch: &TwinPatch, etag: &str) -> Result<(), StoreError>;
}

/// Store handed to the HTTP layer. `None` means no credential was configured.
pub type SharedTwinStore = Option<Arc<dyn TwinStore>>;

/// Builds the configured store. A missing credential yields `None`; a malformed one is an error.
pub async fn build_store(cfg: &Config) -> Result<SharedTwinStore, ConnectionStringError> {
    match cfg.store.kind {
        StoreKind::Memory => {
            let store = MemoryTwinStore::new();
            for device_id in &cfg.store.devices {
                store.register(device_id).await;
            }
            Ok(Some(Arc::new(store)))
        }
        StoreKind::Iothub => {
            let Some(raw) = cfg.connection_string() else {
                warn!("{CONNECTION_STRING_ENV} is not set; update requests will fail");
                return Ok(None);
            };
            let credential: ConnectionString = raw.parse()?;
            info!(host = %credential.host_name, "IoT Hub connection string loaded");
            Ok(Some(Arc::new(IotHubRegistry::new(credential, &cfg.store))))
        }
    }
}

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::coerce::coerce;
use crate::error::UpdateError;
use crate::model::TwinPatch;
use crate::store::{SharedTwinStore, TwinStore};
use crate::validate;

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub device_id: String,
    pub desired: Map<String, Value>,
}

impl UpdateOutcome {
    pub fn message(&self) -> String {
        let props = serde_json::to_string(&self.desired).unwrap_or_else(|_| "{}".to_string());
        format!("Successfully updated twin for device '{}' with properties: {props}", self.device_id)
    }
}

/// Fails with a configuration error when no store credential was configured.
pub fn require_store(store: &SharedTwinStore) -> Result<&Arc<dyn TwinStore>, UpdateError> {
    store.as_ref().ok_or(UpdateError::Configuration)
}

/// Validates and coerces `body`, then writes it to the twin conditioned on the current etag.
///
/// Issues at most one read and one write. Conflicts are returned, not retried.
pub async fn update_desired(store: &dyn TwinStore, body: &[u8]) -> Result<UpdateOutcome, UpdateError> {
    let req = validate::parse(body)?;
    let desired = coerce(req.desired)?;
    let device_id = req.device_id;

    let patch = TwinPatch::desired(desired);
    info!(%device_id, patch = %serde_json::to_string(&patch).unwrap_or_default(), "patch to apply");

    let twin = store.get_twin(&device_id).await?;
    store.update_twin(&device_id, &patch, &twin.etag).await?;

    let desired = patch.properties.desired;
    let names: Vec<&String> = desired.keys().collect();
    info!(%device_id, properties = ?names, "device twin updated");
    Ok(UpdateOutcome { device_id, desired })
}

use serde_json::Value;

use crate::error::ValidationError;
use crate::model::UpdateRequest;

/// Parses a raw request body and checks it carries `deviceId` and an object `desired`.
pub fn parse(body: &[u8]) -> Result<UpdateRequest, ValidationError> {
    let raw: Value = serde_json::from_slice(body).map_err(|_| ValidationError)?;
    validate(raw)
}

pub fn validate(raw: Value) -> Result<UpdateRequest, ValidationError> {
    let Value::Object(mut body) = raw else {
        return Err(ValidationError);
    };

    let device_id = match body.remove("deviceId") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return Err(ValidationError),
    };
    let desired = match body.remove("desired") {
        Some(Value::Object(desired)) => desired,
        _ => return Err(ValidationError),
    };

    Ok(UpdateRequest { device_id, desired })
}

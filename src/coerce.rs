//! Desired-property coercion.
//!
//! Known properties are converted to the type the device firmware expects before the
//! patch is sent. Properties outside the schema are forwarded untouched.

use serde_json::{Map, Number, Value};

use crate::error::CoercionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Boolean,
    Integer,
    Float,
}

/// Declared types for the desired properties the device understands, in check order.
pub const PROPERTY_SCHEMA: &[(&str, PropertyType)] = &[
    ("DemoMode", PropertyType::Boolean),
    ("DeviceModel", PropertyType::Integer),
    ("ExternalControl", PropertyType::Integer),
    ("FlowState", PropertyType::Boolean),
    ("PressureState", PropertyType::Boolean),
    ("VoCuState", PropertyType::Boolean),
    ("currentCalibration", PropertyType::Float),
    ("flowMeterCalibration", PropertyType::Float),
];

const TRUTHY_STRINGS: &[&str] = &["true", "1", "yes", "on"];

/// Outcome of converting a single value.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Coerced(Value),
    Rejected(&'static str),
}

impl PropertyType {
    pub fn coerce(self, value: &Value) -> Coercion {
        match self {
            PropertyType::Boolean => Coercion::Coerced(Value::Bool(to_bool(value))),
            PropertyType::Integer => match to_integer(value) {
                Some(n) => Coercion::Coerced(Value::Number(n)),
                None => Coercion::Rejected("must be a valid integer"),
            },
            PropertyType::Float => match to_float(value) {
                Some(n) => Coercion::Coerced(Value::Number(n)),
                None => Coercion::Rejected("must be a valid number"),
            },
        }
    }
}

/// Returns `desired` with every schema-covered value converted to its declared type.
///
/// Stops at the first property that cannot be converted; nothing is returned in that case.
pub fn coerce(mut desired: Map<String, Value>) -> Result<Map<String, Value>, CoercionError> {
    for (field, ty) in PROPERTY_SCHEMA {
        let Some(value) = desired.get_mut(*field) else {
            continue;
        };
        match ty.coerce(value) {
            Coercion::Coerced(v) => *value = v,
            Coercion::Rejected(reason) => {
                return Err(CoercionError { field: (*field).to_string(), reason });
            }
        }
    }
    Ok(desired)
}

// Unrecognised strings deliberately map to false rather than being rejected.
fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.to_lowercase();
            TRUTHY_STRINGS.contains(&s.as_str())
        }
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// Integral floats (`2.0`) convert; fractional floats and booleans are rejected, not truncated.
fn to_integer(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.clone()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
            (f.fract() == 0.0 && in_range).then(|| Number::from(f as i64))
        }
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Number::from)
                .or_else(|_| s.parse::<u64>().map(Number::from))
                .ok()
        }
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(Number::from_f64),
        _ => None,
    }
}

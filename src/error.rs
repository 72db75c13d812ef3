use hyper::StatusCode;

/// Body returned when the request does not carry a usable `deviceId` / `desired` pair.
pub const VALIDATION_MESSAGE: &str =
    "Request must include 'deviceId' (string) and 'desired' (object).";

/// Body returned when no store credential was configured.
pub const MISSING_CONNECTION_STRING_MESSAGE: &str =
    "Internal error: Missing IoT Hub connection string";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing deviceId or desired")]
pub struct ValidationError;

/// A schema-covered property whose value could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} {reason}.")]
pub struct CoercionError {
    pub field: String,
    pub reason: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("device '{0}' not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The etag supplied with a conditioned write is stale.
    #[error("precondition failed: twin for '{0}' was modified concurrently")]
    Conflict(String),

    #[error("twin store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected twin store response ({status}): {body}")]
    Unexpected { status: u16, body: String },
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Unauthorized(_) => "unauthorized",
            StoreError::Conflict(_) => "conflict",
            StoreError::Unavailable(_) => "unavailable",
            StoreError::Unexpected { .. } => "unexpected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionStringError {
    #[error("connection string is missing '{0}'")]
    MissingField(&'static str),

    #[error("connection string segment '{0}' is not a key=value pair")]
    Malformed(String),

    #[error("SharedAccessKey is not valid base64")]
    InvalidKey,
}

/// Everything that can end an update request early.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("missing IoT Hub connection string")]
    Configuration,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request body could not be read to completion.
    #[error("failed to read request body: {0}")]
    Body(#[from] hyper::Error),
}

impl UpdateError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpdateError::Validation(_) | UpdateError::Coercion(_) => StatusCode::BAD_REQUEST,
            UpdateError::Configuration | UpdateError::Store(_) | UpdateError::Body(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn response_body(&self) -> String {
        match self {
            UpdateError::Configuration => MISSING_CONNECTION_STRING_MESSAGE.to_string(),
            UpdateError::Validation(_) => VALIDATION_MESSAGE.to_string(),
            UpdateError::Coercion(e) => e.to_string(),
            UpdateError::Store(_) | UpdateError::Body(_) => format!("Internal server error: {self}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Configuration => "configuration",
            UpdateError::Validation(_) => "validation",
            UpdateError::Coercion(_) => "coercion",
            UpdateError::Store(e) => e.kind(),
            UpdateError::Body(_) => "body",
        }
    }
}

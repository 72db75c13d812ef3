use std::path::Path;

use serde::Deserialize;

/// Environment variable holding the IoT Hub service connection string.
pub const CONNECTION_STRING_ENV: &str = "IOTHUB_CONNECTION_STRING";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_bind_http")]
    pub bind_http: String,
    /// Path the update endpoint is mounted on.
    #[serde(default = "default_route")]
    pub route: String,
}

fn default_bind_http() -> String {
    "0.0.0.0:7071".to_string()
}

fn default_route() -> String {
    "/api/Update_device_twin".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self { bind_http: default_bind_http(), route: default_route() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Iothub,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_sas_ttl_secs")]
    pub sas_ttl_secs: u64,
    /// Overrides the `https://<HostName>` base URL, e.g. for a private endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Devices registered up front when `kind` is `memory`.
    #[serde(default)]
    pub devices: Vec<String>,
}

fn default_api_version() -> String {
    "2021-04-12".to_string()
}

fn default_sas_ttl_secs() -> u64 {
    3600
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            connection_string: None,
            api_version: default_api_version(),
            sas_ttl_secs: default_sas_ttl_secs(),
            endpoint: None,
            devices: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_yaml::from_slice(&bytes)?)
    }

    /// Loads `path`, falling back to defaults when `required` is false and the file is absent.
    pub fn load(path: &str, required: bool) -> anyhow::Result<Self> {
        if !required && !Path::new(path).exists() {
            return Ok(Self::default());
        }
        Self::from_path(path)
    }

    /// Applies `IOTHUB_CONNECTION_STRING` on top of the file settings.
    pub fn with_env_overrides(self) -> Self {
        self.with_connection_string_override(std::env::var(CONNECTION_STRING_ENV).ok())
    }

    pub fn with_connection_string_override(mut self, value: Option<String>) -> Self {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            self.store.connection_string = Some(v);
        }
        self
    }

    /// The configured credential, treating blank values as unset.
    pub fn connection_string(&self) -> Option<&str> {
        self.store
            .connection_string
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

//! IoT Hub service REST client for device twins.
//!
//! Authenticates with a shared-access-signature token derived from the hub's service
//! connection string. Tokens are minted per call; the client keeps no other state.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, IF_MATCH};
use reqwest::StatusCode;
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{ConnectionStringError, StoreError};
use crate::model::{Twin, TwinPatch};
use crate::store::TwinStore;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `HostName=..;SharedAccessKeyName=..;SharedAccessKey=..` credential.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub key_name: String,
    key: Vec<u8>,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;

        for segment in s.trim().split(';').filter(|seg| !seg.trim().is_empty()) {
            let (k, v) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::Malformed(segment.to_string()))?;
            match k.trim() {
                "HostName" => host_name = Some(v.trim().to_string()),
                "SharedAccessKeyName" => key_name = Some(v.trim().to_string()),
                "SharedAccessKey" => key = Some(v.trim().to_string()),
                _ => {}
            }
        }

        let host_name = host_name
            .filter(|v| !v.is_empty())
            .ok_or(ConnectionStringError::MissingField("HostName"))?;
        let key_name = key_name
            .filter(|v| !v.is_empty())
            .ok_or(ConnectionStringError::MissingField("SharedAccessKeyName"))?;
        let key = key
            .filter(|v| !v.is_empty())
            .ok_or(ConnectionStringError::MissingField("SharedAccessKey"))?;
        let key = STANDARD.decode(key).map_err(|_| ConnectionStringError::InvalidKey)?;

        Ok(Self { host_name, key_name, key })
    }
}

impl ConnectionString {
    /// Builds a `SharedAccessSignature` header value valid until `expiry` (unix seconds).
    pub fn sas_token(&self, expiry: i64) -> String {
        let resource = urlencoding::encode(&self.host_name.to_lowercase()).into_owned();
        let to_sign = format!("{resource}\n{expiry}");

        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac accepts keys of any length");
        mac.update(to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        format!(
            "SharedAccessSignature sr={resource}&sig={}&se={expiry}&skn={}",
            urlencoding::encode(&signature),
            urlencoding::encode(&self.key_name),
        )
    }
}

pub struct IotHubRegistry {
    http: reqwest::Client,
    credential: ConnectionString,
    /// Scheme and authority requests are sent to, `https://<HostName>` unless overridden.
    base_url: String,
    api_version: String,
    sas_ttl_secs: i64,
}

impl IotHubRegistry {
    pub fn new(credential: ConnectionString, cfg: &StoreConfig) -> Self {
        let base_url = cfg
            .endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("https://{}", credential.host_name));
        Self {
            http: reqwest::Client::new(),
            base_url,
            credential,
            api_version: cfg.api_version.clone(),
            sas_ttl_secs: i64::try_from(cfg.sas_ttl_secs).unwrap_or(i64::MAX / 2),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.credential.host_name
    }

    fn twin_url(&self, device_id: &str) -> String {
        twin_url(&self.base_url, device_id, &self.api_version)
    }

    fn authorization(&self) -> String {
        let expiry = chrono::Utc::now().timestamp().saturating_add(self.sas_ttl_secs);
        self.credential.sas_token(expiry)
    }
}

fn twin_url(base_url: &str, device_id: &str, api_version: &str) -> String {
    format!(
        "{base_url}/twins/{}?api-version={}",
        urlencoding::encode(device_id),
        urlencoding::encode(api_version)
    )
}

/// Maps a non-success registry response onto the store error taxonomy.
fn classify(device_id: &str, status: StatusCode, body: String) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(device_id.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(body),
        StatusCode::PRECONDITION_FAILED => StoreError::Conflict(device_id.to_string()),
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            StoreError::Unavailable(format!("{s}: {body}"))
        }
        s => StoreError::Unexpected { status: s.as_u16(), body },
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

async fn check(device_id: &str, resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(classify(device_id, status, body))
}

#[async_trait]
impl TwinStore for IotHubRegistry {
    async fn get_twin(&self, device_id: &str) -> Result<Twin, StoreError> {
        debug!(%device_id, host = %self.host_name(), "fetching twin");
        let resp = self
            .http
            .get(self.twin_url(device_id))
            .header(AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(transport)?;
        let resp = check(device_id, resp).await?;

        let header_etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        let document: Value = resp.json().await.map_err(|e| StoreError::Unexpected {
            status: StatusCode::OK.as_u16(),
            body: format!("invalid twin document: {e}"),
        })?;

        let etag = document
            .get("etag")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(header_etag)
            .ok_or_else(|| StoreError::Unexpected {
                status: StatusCode::OK.as_u16(),
                body: "twin document carries no etag".to_string(),
            })?;

        Ok(Twin { device_id: device_id.to_string(), etag, document })
    }

    async fn update_twin(&self, device_id: &str, patch: &TwinPatch, etag: &str) -> Result<(), StoreError> {
        debug!(%device_id, %etag, "patching twin");
        let resp = self
            .http
            .patch(self.twin_url(device_id))
            .header(AUTHORIZATION, self.authorization())
            .header(IF_MATCH, etag)
            .json(patch)
            .send()
            .await
            .map_err(transport)?;
        check(device_id, resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN: &str =
        "HostName=Demo-Hub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey=c2VjcmV0LWtleQ==";

    #[test]
    fn parses_service_connection_string() {
        let cs: ConnectionString = CONN.parse().unwrap();
        assert_eq!(cs.host_name, "Demo-Hub.azure-devices.net");
        assert_eq!(cs.key_name, "iothubowner");
        assert_eq!(cs.key, b"secret-key");
    }

    #[test]
    fn tolerates_trailing_separator_and_extra_fields() {
        let cs: ConnectionString = format!("{CONN};DeviceId=ignored;").parse().unwrap();
        assert_eq!(cs.key_name, "iothubowner");
    }

    #[test]
    fn rejects_incomplete_connection_strings() {
        assert_eq!(
            "SharedAccessKeyName=a;SharedAccessKey=YQ==".parse::<ConnectionString>(),
            Err(ConnectionStringError::MissingField("HostName"))
        );
        assert_eq!(
            "HostName=h;SharedAccessKeyName=a".parse::<ConnectionString>(),
            Err(ConnectionStringError::MissingField("SharedAccessKey"))
        );
        assert_eq!(
            "HostName=h;garbage".parse::<ConnectionString>(),
            Err(ConnectionStringError::Malformed("garbage".to_string()))
        );
        assert_eq!(
            "HostName=h;SharedAccessKeyName=a;SharedAccessKey=%%%".parse::<ConnectionString>(),
            Err(ConnectionStringError::InvalidKey)
        );
    }

    #[test]
    fn debug_output_hides_key() {
        let cs: ConnectionString = CONN.parse().unwrap();
        let dbg = format!("{cs:?}");
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn sas_token_shape() {
        let cs: ConnectionString = CONN.parse().unwrap();
        let token = cs.sas_token(1_700_000_000);
        assert!(token.starts_with("SharedAccessSignature sr=demo-hub.azure-devices.net&sig="));
        assert!(token.contains("&se=1700000000&"));
        assert!(token.ends_with("&skn=iothubowner"));
        assert_eq!(token, cs.sas_token(1_700_000_000));
        assert_ne!(token, cs.sas_token(1_700_000_001));
    }

    #[test]
    fn twin_url_escapes_device_id() {
        assert_eq!(
            twin_url("https://hub.azure-devices.net", "dev 1/a", "2021-04-12"),
            "https://hub.azure-devices.net/twins/dev%201%2Fa?api-version=2021-04-12"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify("d", StatusCode::NOT_FOUND, String::new()), StoreError::NotFound(id) if id == "d"));
        assert!(matches!(classify("d", StatusCode::FORBIDDEN, String::new()), StoreError::Unauthorized(_)));
        assert!(matches!(classify("d", StatusCode::PRECONDITION_FAILED, String::new()), StoreError::Conflict(_)));
        assert!(matches!(classify("d", StatusCode::TOO_MANY_REQUESTS, String::new()), StoreError::Unavailable(_)));
        assert!(matches!(classify("d", StatusCode::BAD_GATEWAY, String::new()), StoreError::Unavailable(_)));
        assert!(matches!(
            classify("d", StatusCode::BAD_REQUEST, "bad".to_string()),
            StoreError::Unexpected { status: 400, .. }
        ));
    }

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response};
    use serde_json::json;

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        uri: String,
        authorization: String,
        if_match: Option<String>,
        body: Value,
    }

    /// Local twin registry: GET returns a twin, the first PATCH succeeds, later ones get 412.
    fn spawn_hub() -> (String, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let patches = Arc::new(AtomicUsize::new(0));
        let seen_svc = seen.clone();

        let make_svc = make_service_fn(move |_conn| {
            let seen = seen_svc.clone();
            let patches = patches.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                    let seen = seen.clone();
                    let patches = patches.clone();
                    async move {
                        let method = req.method().to_string();
                        let uri = req.uri().to_string();
                        let path = req.uri().path().to_string();
                        let authorization = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        let if_match = req
                            .headers()
                            .get("if-match")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let bytes = hyper::body::to_bytes(req.into_body()).await?;
                        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                        seen.lock().unwrap().push(Seen { method: method.clone(), uri, authorization, if_match, body });

                        let resp = match method.as_str() {
                            "GET" if path == "/twins/quoted" => Response::builder()
                                .header("etag", "\"hdr-etag\"")
                                .body(Body::from(r#"{"deviceId":"quoted"}"#))
                                .unwrap(),
                            "GET" => Response::new(Body::from(
                                r#"{"deviceId":"dev-1","etag":"AAAAAAAAAAE=","properties":{"desired":{}}}"#,
                            )),
                            "PATCH" if patches.fetch_add(1, Ordering::SeqCst) == 0 => Response::new(Body::from("{}")),
                            _ => Response::builder()
                                .status(412)
                                .body(Body::from("PreconditionFailed"))
                                .unwrap(),
                        };
                        Ok::<_, hyper::Error>(resp)
                    }
                }))
            }
        });

        let server = hyper::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        (format!("http://{addr}"), seen)
    }

    fn registry(base_url: String) -> IotHubRegistry {
        let cfg = StoreConfig { endpoint: Some(base_url), ..StoreConfig::default() };
        let mut reg = IotHubRegistry::new(CONN.parse().unwrap(), &cfg);
        reg.http = reqwest::Client::builder().no_proxy().build().unwrap();
        reg
    }

    #[test]
    fn defaults_to_https_host() {
        let reg = IotHubRegistry::new(CONN.parse().unwrap(), &StoreConfig::default());
        assert_eq!(
            reg.twin_url("dev-1"),
            "https://Demo-Hub.azure-devices.net/twins/dev-1?api-version=2021-04-12"
        );
    }

    #[tokio::test]
    async fn conditioned_write_round_trip() {
        let (base_url, seen) = spawn_hub();
        let reg = registry(base_url);

        let twin = reg.get_twin("dev-1").await.unwrap();
        assert_eq!(twin.etag, "AAAAAAAAAAE=");

        let mut desired = serde_json::Map::new();
        desired.insert("DemoMode".to_string(), json!(true));
        let patch = TwinPatch::desired(desired);
        reg.update_twin("dev-1", &patch, &twin.etag).await.unwrap();

        let stale = reg.update_twin("dev-1", &patch, &twin.etag).await;
        assert!(matches!(stale, Err(StoreError::Conflict(id)) if id == "dev-1"));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].uri, "/twins/dev-1?api-version=2021-04-12");
        assert!(seen[0].authorization.starts_with("SharedAccessSignature sr=demo-hub.azure-devices.net&sig="));
        assert_eq!(seen[0].if_match, None);

        assert_eq!(seen[1].method, "PATCH");
        assert_eq!(seen[1].uri, "/twins/dev-1?api-version=2021-04-12");
        assert_eq!(seen[1].if_match.as_deref(), Some("AAAAAAAAAAE="));
        assert_eq!(seen[1].body, json!({"properties": {"desired": {"DemoMode": true}}}));
    }

    #[tokio::test]
    async fn etag_header_is_used_when_document_has_none() {
        let (base_url, _seen) = spawn_hub();
        let twin = registry(base_url).get_twin("quoted").await.unwrap();
        assert_eq!(twin.etag, "hdr-etag");
        assert_eq!(twin.document, json!({"deviceId": "quoted"}));
    }
}

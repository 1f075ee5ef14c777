//! Remote key encryption over a Vault-compatible transit engine.
//!
//! Each subject gets its own derived transit key named `{prefix}-{subject}`.
//! The data key never leaves this process in the clear except inside the TLS
//! request to the engine; what comes back (and is stored in the envelope) is
//! the engine's ciphertext string.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    dashmap::DashSet,
    reqwest::{Client, Method},
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::{Value, json},
    shredder_config::TransitConfig,
    shredder_keystore::{RetryPolicy, retry},
    tracing::{debug, info},
    url::Url,
    zeroize::Zeroizing,
};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, kms as kms_metrics, labels};

use crate::{Result, error::CryptoError, kek::KeyEncryptionService};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Transit key type created for every subject.
const KEY_TYPE: &str = "aes256-gcm96";

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct EncryptData {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: String,
}

#[derive(Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

pub struct TransitKeyEncryptionService {
    client: Client,
    base: Url,
    token: Secret<String>,
    mount: Vec<String>,
    key_prefix: String,
    policy: RetryPolicy,
    known_keys: DashSet<String>,
    closed: AtomicBool,
}

impl TransitKeyEncryptionService {
    pub fn new(
        client: Client,
        base: Url,
        token: Secret<String>,
        mount: &str,
        key_prefix: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(CryptoError::Config(format!("transit url {base} cannot be a base")));
        }
        let mount: Vec<String> = mount
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if mount.is_empty() {
            return Err(CryptoError::Config("transit mount must not be empty".into()));
        }
        Ok(Self {
            client,
            base,
            token,
            mount,
            key_prefix: key_prefix.into(),
            policy,
            known_keys: DashSet::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &TransitConfig, policy: RetryPolicy) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| CryptoError::Config("transit.url is required".into()))?;
        let base = Url::parse(url)
            .map_err(|e| CryptoError::Config(format!("transit.url {url:?}: {e}")))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| CryptoError::Config("transit.token is required".into()))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CryptoError::Config(format!("http client: {e}")))?;

        Self::new(client, base, token, &config.mount, &config.key_prefix, policy)
    }

    fn key_name(&self, subject: &str) -> String {
        format!("{}-{subject}", self.key_prefix)
    }

    fn endpoint(&self, parts: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("v1")
                .extend(&self.mount)
                .extend(parts);
        }
        url
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CryptoError::Closed);
        }
        Ok(())
    }

    /// One request; non-2xx statuses become [`CryptoError::Kms`]. Returns the
    /// parsed body, or `None` for an empty one.
    async fn send_once(
        &self,
        operation: &'static str,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        #[cfg(feature = "metrics")]
        counter!(kms_metrics::REQUESTS_TOTAL, labels::OPERATION => operation).increment(1);

        let mut request = self
            .client
            .request(method, url.as_str())
            .header(TOKEN_HEADER, self.token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| CryptoError::kms(operation, None, e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CryptoError::kms(operation, Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            #[cfg(feature = "metrics")]
            counter!(kms_metrics::ERRORS_TOTAL, labels::OPERATION => operation).increment(1);

            let errors = serde_json::from_str::<ErrorResponse>(&text)
                .unwrap_or_default()
                .errors;
            let message = if errors.is_empty() {
                text
            } else {
                errors.join("; ")
            };
            return Err(CryptoError::kms(operation, Some(status.as_u16()), message));
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CryptoError::kms(operation, Some(status.as_u16()), e.to_string()))
    }

    /// [`send_once`](Self::send_once) under the retry policy.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<Option<Value>> {
        retry(&self.policy, CryptoError::is_retryable, || {
            self.send_once(operation, method.clone(), &url, body.as_ref())
        })
        .await
    }

    async fn send_for<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        url: Url,
        body: Value,
    ) -> Result<T> {
        let value = self
            .send(operation, Method::POST, url, Some(body))
            .await?
            .ok_or_else(|| CryptoError::kms(operation, None, "empty response body"))?;
        serde_json::from_value::<DataResponse<T>>(value)
            .map(|r| r.data)
            .map_err(|e| CryptoError::kms(operation, None, format!("unexpected response: {e}")))
    }

    async fn ensure_key(&self, name: &str) -> Result<()> {
        if self.known_keys.contains(name) {
            return Ok(());
        }
        let url = self.endpoint(&["keys", name]);
        self.send(
            "create_key",
            Method::POST,
            url,
            Some(json!({ "type": KEY_TYPE, "derived": true })),
        )
        .await?;
        debug!(key = name, "transit key ensured");
        self.known_keys.insert(name.to_string());
        Ok(())
    }
}

fn is_not_found(err: &CryptoError) -> bool {
    match err {
        CryptoError::Kms {
            status: Some(404), ..
        } => true,
        CryptoError::Kms {
            status: Some(400),
            message,
            ..
        } => message.contains("not found"),
        _ => false,
    }
}

#[async_trait]
impl KeyEncryptionService for TransitKeyEncryptionService {
    fn name(&self) -> &'static str {
        "transit"
    }

    async fn wrap(&self, subject: &str, key_bytes: &[u8], context: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let name = self.key_name(subject);
        self.ensure_key(&name).await?;

        let body = json!({
            "plaintext": STANDARD.encode(key_bytes),
            "context": STANDARD.encode(context),
        });
        let url = self.endpoint(&["encrypt", &name]);
        let data: EncryptData = match self.send_for("encrypt", url.clone(), body.clone()).await {
            Ok(data) => data,
            // Key deleted elsewhere since it was cached: recreate once.
            Err(e) if is_not_found(&e) => {
                self.known_keys.remove(&name);
                debug!(key = %name, "cached transit key is gone, recreating");
                self.ensure_key(&name).await?;
                self.send_for("encrypt", url, body).await.inspect_err(|e| {
                    if is_not_found(e) {
                        self.known_keys.remove(&name);
                    }
                })?
            },
            Err(e) => return Err(e),
        };
        Ok(data.ciphertext.into_bytes())
    }

    async fn unwrap(
        &self,
        subject: &str,
        wrapped: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.ensure_open()?;
        let ciphertext = std::str::from_utf8(wrapped)
            .map_err(|_| CryptoError::key_unwrap(subject, "wrapped key is not a transit ciphertext"))?;
        let name = self.key_name(subject);

        let body = json!({
            "ciphertext": ciphertext,
            "context": STANDARD.encode(context),
        });
        let data: DecryptData = match self
            .send_for("decrypt", self.endpoint(&["decrypt", &name]), body)
            .await
        {
            Ok(data) => data,
            Err(e) if is_not_found(&e) => return Err(CryptoError::missing(subject)),
            Err(e) => return Err(e),
        };

        STANDARD
            .decode(data.plaintext.as_bytes())
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::key_unwrap(subject, e.to_string()))
    }

    async fn delete(&self, subject: &str) -> Result<bool> {
        self.ensure_open()?;
        let name = self.key_name(subject);

        match self
            .send("read_key", Method::GET, self.endpoint(&["keys", &name]), None)
            .await
        {
            Ok(_) => {},
            Err(e) if is_not_found(&e) => {
                self.known_keys.remove(&name);
                return Ok(false);
            },
            Err(e) => return Err(e),
        }

        self.send(
            "config_key",
            Method::POST,
            self.endpoint(&["keys", &name, "config"]),
            Some(json!({ "deletion_allowed": true })),
        )
        .await?;
        self.send("delete_key", Method::DELETE, self.endpoint(&["keys", &name]), None)
            .await?;
        self.known_keys.remove(&name);

        info!(subject, key = %name, "transit key deleted");
        Ok(true)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.known_keys.clear();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, std::time::Duration};

    fn service(server: &mockito::Server, max_retries: u32) -> TransitKeyEncryptionService {
        TransitKeyEncryptionService::new(
            Client::new(),
            Url::parse(&server.url()).unwrap(),
            Secret::new("root-token".to_string()),
            "transit",
            "shredder",
            RetryPolicy {
                max_retries,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn wrap_creates_key_once_and_round_trips() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/v1/transit/keys/shredder-alice")
            .match_header("x-vault-token", "root-token")
            .match_body(Matcher::PartialJson(json!({ "type": "aes256-gcm96", "derived": true })))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let encrypt = server
            .mock("POST", "/v1/transit/encrypt/shredder-alice")
            .match_body(Matcher::PartialJson(json!({
                "plaintext": STANDARD.encode(b"dek"),
                "context": STANDARD.encode("subject=alice"),
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": { "ciphertext": "vault:v1:abc" } }).to_string())
            .expect(2)
            .create_async()
            .await;
        let decrypt = server
            .mock("POST", "/v1/transit/decrypt/shredder-alice")
            .match_body(Matcher::PartialJson(json!({ "ciphertext": "vault:v1:abc" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": { "plaintext": STANDARD.encode(b"dek") } }).to_string())
            .create_async()
            .await;

        let kms = service(&server, 0);
        let wrapped = kms.wrap("alice", b"dek", "subject=alice").await.unwrap();
        kms.wrap("alice", b"dek", "subject=alice").await.unwrap();
        assert_eq!(wrapped, b"vault:v1:abc");

        let unwrapped = kms.unwrap("alice", &wrapped, "subject=alice").await.unwrap();
        assert_eq!(unwrapped.as_slice(), b"dek");

        create.assert_async().await;
        encrypt.assert_async().await;
        decrypt.assert_async().await;
    }

    #[tokio::test]
    async fn key_deleted_elsewhere_is_recreated_once() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/v1/transit/keys/shredder-alice")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let encrypt = server
            .mock("POST", "/v1/transit/encrypt/shredder-alice")
            .with_status(404)
            .with_body(json!({ "errors": [] }).to_string())
            .expect(2)
            .create_async()
            .await;

        let kms = service(&server, 0);
        kms.known_keys.insert("shredder-alice".to_string());

        let err = kms.wrap("alice", b"dek", "subject=alice").await.unwrap_err();
        assert!(matches!(err, CryptoError::Kms { status: Some(404), .. }));
        assert!(!kms.known_keys.contains("shredder-alice"));
        create.assert_async().await;
        encrypt.assert_async().await;
    }

    #[tokio::test]
    async fn unwrap_without_key_is_missing_material() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/transit/decrypt/shredder-bob")
            .with_status(400)
            .with_body(json!({ "errors": ["encryption key not found"] }).to_string())
            .create_async()
            .await;

        let err = service(&server, 0)
            .unwrap("bob", b"vault:v1:xyz", "subject=bob")
            .await
            .unwrap_err();
        assert!(err.is_missing_material());
    }

    #[tokio::test]
    async fn unwrap_rejection_is_kms_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/transit/decrypt/shredder-bob")
            .with_status(400)
            .with_body(json!({ "errors": ["cipher: message authentication failed"] }).to_string())
            .create_async()
            .await;

        let err = service(&server, 0)
            .unwrap("bob", b"vault:v1:xyz", "subject=bob")
            .await
            .unwrap_err();
        assert!(!err.is_missing_material());
        assert!(!err.is_retryable());
        assert!(matches!(err, CryptoError::Kms { status: Some(400), ref message, .. } if message.contains("authentication")));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/transit/keys/shredder-carol")
            .with_status(503)
            .with_body(json!({ "errors": ["Vault is sealed"] }).to_string())
            .expect(3)
            .create_async()
            .await;

        let err = service(&server, 2)
            .wrap("carol", b"dek", "subject=carol")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::Kms { status: Some(503), ref message, .. } if message == "Vault is sealed"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_existing_key() {
        let mut server = mockito::Server::new_async().await;
        let read = server
            .mock("GET", "/v1/transit/keys/shredder-dave")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "data": { "name": "shredder-dave" } }).to_string())
            .create_async()
            .await;
        let config = server
            .mock("POST", "/v1/transit/keys/shredder-dave/config")
            .match_body(Matcher::Json(json!({ "deletion_allowed": true })))
            .with_status(204)
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/v1/transit/keys/shredder-dave")
            .with_status(204)
            .create_async()
            .await;

        assert!(service(&server, 0).delete("dave").await.unwrap());
        read.assert_async().await;
        config.assert_async().await;
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn delete_unknown_key_returns_false() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/transit/keys/shredder-erin")
            .with_status(404)
            .with_body(json!({ "errors": [] }).to_string())
            .create_async()
            .await;

        assert!(!service(&server, 0).delete("erin").await.unwrap());
    }

    #[tokio::test]
    async fn closed_service_refuses_requests() {
        let server = mockito::Server::new_async().await;
        let kms = service(&server, 0);
        kms.close().await;
        assert!(matches!(
            kms.wrap("frank", b"dek", "subject=frank").await,
            Err(CryptoError::Closed)
        ));
    }

    #[test]
    fn from_config_requires_url_and_token() {
        let mut config = TransitConfig::default();
        let err = TransitKeyEncryptionService::from_config(&config, RetryPolicy::none())
            .err()
            .unwrap();
        assert!(err.to_string().contains("transit.url"));

        config.url = Some("https://vault.internal:8200".into());
        let err = TransitKeyEncryptionService::from_config(&config, RetryPolicy::none())
            .err()
            .unwrap();
        assert!(err.to_string().contains("transit.token"));

        config.token = Some(Secret::new("t".into()));
        assert!(TransitKeyEncryptionService::from_config(&config, RetryPolicy::none()).is_ok());
    }

    #[test]
    fn endpoint_encodes_subject_and_nested_mount() {
        let kms = TransitKeyEncryptionService::new(
            Client::new(),
            Url::parse("https://vault.internal:8200/").unwrap(),
            Secret::new("t".into()),
            "/kv/transit/",
            "pd",
            RetryPolicy::none(),
        )
        .unwrap();
        let url = kms.endpoint(&["encrypt", &kms.key_name("a b/c")]);
        assert_eq!(
            url.as_str(),
            "https://vault.internal:8200/v1/kv/transit/encrypt/pd-a%20b%2Fc"
        );
    }
}

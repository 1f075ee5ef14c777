//! Config schema types (markers, key store, materials, transit, retry, metrics).
use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShredderConfig {
    pub markers: MarkersConfig,
    pub key_store: KeyStoreConfig,
    pub materials: MaterialsConfig,
    pub transit: TransitConfig,
    pub retry: RetryConfig,
    pub metrics: MetricsConfig,
}

/// Names of the schema markers that drive field discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkersConfig {
    /// Marker on the field holding the data owner's identity.
    pub subject_identifier: String,
    /// Marker on oneof groups holding personal data.
    pub personal_data: String,
}

impl Default for MarkersConfig {
    fn default() -> Self {
        Self {
            subject_identifier: "subject_identifier".into(),
            personal_data: "personal_data".into(),
        }
    }
}

/// Which key store backs subject key material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStoreBackend {
    #[default]
    Memory,
    Sqlite,
    Replicated,
}

impl KeyStoreBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Replicated => "replicated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub backend: KeyStoreBackend,
    /// sqlx connection URL, e.g. `sqlite://keys.db?mode=rwc`. Required for
    /// the sqlite backend.
    pub sqlite_url: Option<String>,
    /// How long a replicated write may take to become locally visible.
    pub visibility_timeout_secs: u64,
    /// Poll interval while waiting for a replicated write.
    pub poll_interval_ms: u64,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            backend: KeyStoreBackend::default(),
            sqlite_url: None,
            visibility_timeout_secs: 30,
            poll_interval_ms: 50,
        }
    }
}

impl KeyStoreConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How personal data keys are derived from subject material.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialsMode {
    /// The subject key encrypts payloads directly.
    Direct,
    /// A fresh data key per payload, wrapped by the subject key.
    #[default]
    Envelope,
}

impl MaterialsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Envelope => "envelope",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherAlgorithm {
    #[default]
    Aes256,
    #[serde(rename = "xchacha20")]
    XChaCha20,
}

/// Where subject key-encryption keys live in envelope mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KekBackend {
    /// KEKs are held in the configured key store.
    #[default]
    Local,
    /// KEKs never leave a transit-style KMS.
    Transit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialsConfig {
    pub mode: MaterialsMode,
    pub algorithm: CipherAlgorithm,
    pub kek: KekBackend,
}

/// Transit KMS connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    /// Base URL, e.g. `https://vault.internal:8200`.
    pub url: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    /// Mount point of the transit engine.
    pub mount: String,
    /// Prefix for per-subject key names.
    pub key_prefix: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for TransitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("mount", &self.mount)
            .field("key_prefix", &self.key_prefix)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            mount: "transit".into(),
            key_prefix: "shredder".into(),
            timeout_secs: 10,
        }
    }
}

impl TransitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Backoff for transient key store and KMS failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ShredderConfig::default();
        assert_eq!(config.key_store.backend, KeyStoreBackend::Memory);
        assert_eq!(config.key_store.visibility_timeout(), Duration::from_secs(30));
        assert_eq!(config.key_store.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.materials.mode, MaterialsMode::Envelope);
        assert_eq!(config.materials.algorithm, CipherAlgorithm::Aes256);
        assert_eq!(config.transit.mount, "transit");
        assert_eq!(config.markers.subject_identifier, "subject_identifier");
    }

    #[test]
    fn algorithm_names() {
        let materials: MaterialsConfig =
            toml::from_str("algorithm = \"xchacha20\"\nmode = \"direct\"").unwrap();
        assert_eq!(materials.algorithm, CipherAlgorithm::XChaCha20);
        assert_eq!(materials.mode, MaterialsMode::Direct);
    }

    #[test]
    fn transit_token_is_redacted_in_debug() {
        let transit: TransitConfig = toml::from_str("token = \"s.hunter2\"").unwrap();
        let debug = format!("{transit:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(transit.token.unwrap().expose_secret(), "s.hunter2");
    }

    #[test]
    fn token_survives_serialization() {
        let mut config = ShredderConfig::default();
        config.transit.token = Some(Secret::new("s.abc".into()));
        let out = toml::to_string(&config).unwrap();
        let back: ShredderConfig = toml::from_str(&out).unwrap();
        assert_eq!(back.transit.token.unwrap().expose_secret(), "s.abc");
    }
}

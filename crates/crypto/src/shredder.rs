//! Top-level handle: encryptor, decryptor and subject shredding over one
//! materials provider, assembled from configuration.

use std::sync::Arc;

use {
    shredder_config::{
        CipherAlgorithm, KekBackend, KeyStoreBackend, MaterialsMode, RetryConfig, ShredderConfig,
    },
    shredder_keystore::{
        BroadcastCommandLog, CommandLog, InMemoryKeyStore, KeyAlgorithm, KeyStore,
        ReplicatedKeyStore, ReplicationOptions, RetryPolicy, RetryingKeyStore, SqliteKeyStore,
    },
    tracing::info,
};

use crate::{
    Result,
    encryptor::{Decryptor, Encryptor, EnvelopeDecryptor, EnvelopeEncryptor},
    error::CryptoError,
    kek::{KeyEncryptionService, LocalKeyEncryptionService},
    materials::{DirectMaterialsProvider, EnvelopeMaterialsProvider, MaterialsProvider},
    transit::TransitKeyEncryptionService,
};

pub fn key_algorithm(algorithm: CipherAlgorithm) -> KeyAlgorithm {
    match algorithm {
        CipherAlgorithm::Aes256 => KeyAlgorithm::Aes256,
        CipherAlgorithm::XChaCha20 => KeyAlgorithm::XChaCha20,
    }
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries,
        initial_backoff: config.initial_backoff(),
        max_backoff: config.max_backoff(),
    }
}

pub struct CryptoShredder {
    provider: Arc<dyn MaterialsProvider>,
    encryptor: Arc<dyn Encryptor>,
    decryptor: Arc<dyn Decryptor>,
}

impl CryptoShredder {
    pub fn new(provider: Arc<dyn MaterialsProvider>) -> Self {
        Self {
            encryptor: Arc::new(EnvelopeEncryptor::new(Arc::clone(&provider))),
            decryptor: Arc::new(EnvelopeDecryptor::new(Arc::clone(&provider))),
            provider,
        }
    }

    /// Start assembling a shredder from `config`.
    pub fn builder(config: &ShredderConfig) -> ShredderBuilder<'_> {
        ShredderBuilder {
            config,
            command_log: None,
        }
    }

    pub fn encryptor(&self) -> Arc<dyn Encryptor> {
        Arc::clone(&self.encryptor)
    }

    pub fn decryptor(&self) -> Arc<dyn Decryptor> {
        Arc::clone(&self.decryptor)
    }

    pub fn mode(&self) -> &'static str {
        self.provider.mode()
    }

    /// Delete all key material of `subject`. Every envelope sealed for it so
    /// far becomes permanently unreadable. Returns whether material existed.
    pub async fn shred(&self, subject: &str) -> Result<bool> {
        let removed = self.provider.shred(subject).await?;
        if removed {
            info!(subject, mode = self.provider.mode(), "subject shredded");
        } else {
            info!(subject, mode = self.provider.mode(), "nothing to shred");
        }
        Ok(removed)
    }

    pub async fn close(&self) {
        self.provider.close().await;
    }
}

pub struct ShredderBuilder<'a> {
    config: &'a ShredderConfig,
    command_log: Option<Arc<dyn CommandLog>>,
}

impl ShredderBuilder<'_> {
    /// Command log for the replicated backend. Without one an in-process
    /// [`BroadcastCommandLog`] is used, which only replicates within this
    /// process.
    #[must_use]
    pub fn command_log(mut self, log: Arc<dyn CommandLog>) -> Self {
        self.command_log = Some(log);
        self
    }

    pub async fn build(self) -> Result<CryptoShredder> {
        let config = self.config;
        let policy = retry_policy(&config.retry);
        let algorithm = key_algorithm(config.materials.algorithm);

        let provider: Arc<dyn MaterialsProvider> = match config.materials.mode {
            MaterialsMode::Direct => {
                let store = self.key_store(algorithm, &policy).await?;
                Arc::new(DirectMaterialsProvider::new(store))
            },
            MaterialsMode::Envelope => {
                let kek: Arc<dyn KeyEncryptionService> = match config.materials.kek {
                    KekBackend::Local => Arc::new(LocalKeyEncryptionService::new(
                        self.key_store(algorithm, &policy).await?,
                    )),
                    KekBackend::Transit => Arc::new(TransitKeyEncryptionService::from_config(
                        &config.transit,
                        policy.clone(),
                    )?),
                };
                Arc::new(EnvelopeMaterialsProvider::new(kek, algorithm))
            },
        };

        info!(
            mode = provider.mode(),
            backend = config.key_store.backend.as_str(),
            algorithm = algorithm.as_str(),
            "crypto shredder ready"
        );
        Ok(CryptoShredder::new(provider))
    }

    async fn key_store(
        &self,
        algorithm: KeyAlgorithm,
        policy: &RetryPolicy,
    ) -> Result<Arc<dyn KeyStore>> {
        let settings = &self.config.key_store;
        let store: Arc<dyn KeyStore> = match settings.backend {
            KeyStoreBackend::Memory => Arc::new(InMemoryKeyStore::with_algorithm(algorithm)),
            KeyStoreBackend::Sqlite => {
                let url = settings.sqlite_url.as_deref().ok_or_else(|| {
                    CryptoError::Config("key_store.sqlite_url is required for sqlite".into())
                })?;
                Arc::new(SqliteKeyStore::new(url, algorithm).await?)
            },
            KeyStoreBackend::Replicated => {
                let log = self.command_log.clone().unwrap_or_else(|| {
                    let local: Arc<dyn CommandLog> = Arc::new(BroadcastCommandLog::new());
                    local
                });
                Arc::new(ReplicatedKeyStore::start(log, ReplicationOptions {
                    visibility_timeout: settings.visibility_timeout(),
                    poll_interval: settings.poll_interval(),
                    algorithm,
                }))
            },
        };

        if policy.max_retries == 0 {
            return Ok(store);
        }
        Ok(Arc::new(RetryingKeyStore::new(store, policy.clone())))
    }
}

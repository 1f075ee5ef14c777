//! Materials providers: resolve the data key for one subject.
//!
//! Encryption creates material on demand; decryption only looks it up and
//! fails with [`CryptoError::MissingMaterial`] when the subject has none,
//! which after shredding is the expected outcome.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    shredder_keystore::{KeyAlgorithm, KeyStore, StoreError},
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, keystore as keystore_metrics, labels};

use crate::{
    Result,
    engine::DataKey,
    envelope::{EncryptedEnvelope, EnvelopeMetadata},
    error::CryptoError,
    kek::KeyEncryptionService,
};

/// Prefix of every encryption context.
pub const CONTEXT_PREFIX: &str = "subject=";

/// The encryption context a subject's data keys are wrapped under.
pub fn encryption_context(subject: &str) -> String {
    format!("{CONTEXT_PREFIX}{subject}")
}

/// A data key wrapped under a subject's KEK, as carried in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub wrapped_data_key: Vec<u8>,
    pub encryption_context: String,
}

/// Everything needed to seal one payload.
#[derive(Debug)]
pub struct EncryptionMaterials {
    pub data_key: DataKey,
    /// Present in envelope mode.
    pub wrapped: Option<WrappedKey>,
}

/// Everything needed to open one payload.
#[derive(Debug)]
pub struct DecryptionMaterials {
    pub data_key: DataKey,
}

/// Where to find the data key for a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAddress {
    /// The subject's stored key is the data key.
    Subject,
    /// The data key travels wrapped next to the ciphertext.
    Wrapped {
        wrapped_data_key: Vec<u8>,
        encryption_context: String,
    },
}

impl From<&EnvelopeMetadata> for KeyAddress {
    fn from(metadata: &EnvelopeMetadata) -> Self {
        match metadata {
            EnvelopeMetadata::Direct { .. } => Self::Subject,
            EnvelopeMetadata::Wrapped {
                wrapped_data_key,
                encryption_context,
                ..
            } => Self::Wrapped {
                wrapped_data_key: wrapped_data_key.clone(),
                encryption_context: encryption_context.clone(),
            },
        }
    }
}

impl From<&EncryptedEnvelope> for KeyAddress {
    fn from(envelope: &EncryptedEnvelope) -> Self {
        Self::from(envelope.metadata())
    }
}

#[async_trait]
pub trait EncryptingMaterialsProvider: Send + Sync {
    /// Data key for a new payload of `subject`, creating subject material if
    /// absent. Fails only on backend errors.
    async fn encryption_keys_for(&self, subject: &str) -> Result<EncryptionMaterials>;
}

#[async_trait]
pub trait DecryptingMaterialsProvider: Send + Sync {
    /// Data key for an existing payload of `subject`. Never creates material.
    async fn decryption_keys_for(
        &self,
        subject: &str,
        address: &KeyAddress,
    ) -> Result<DecryptionMaterials>;
}

/// A provider serving both directions over one backing store, plus the
/// subject lifecycle.
#[async_trait]
pub trait MaterialsProvider: EncryptingMaterialsProvider + DecryptingMaterialsProvider {
    /// `"direct"` or `"envelope"`.
    fn mode(&self) -> &'static str;

    /// Delete the subject's material (crypto shredding). Returns whether
    /// anything was removed.
    async fn shred(&self, subject: &str) -> Result<bool>;

    /// Release the backing store. Idempotent.
    async fn close(&self);
}

fn check_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(StoreError::EmptySubject.into());
    }
    Ok(())
}

// ── Direct ──────────────────────────────────────────────────────────────────

/// The subject's stored key encrypts payloads directly.
pub struct DirectMaterialsProvider<S: KeyStore + ?Sized = dyn KeyStore> {
    store: Arc<S>,
    closed: AtomicBool,
}

impl<S: KeyStore + ?Sized> DirectMaterialsProvider<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CryptoError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyStore + ?Sized> EncryptingMaterialsProvider for DirectMaterialsProvider<S> {
    async fn encryption_keys_for(&self, subject: &str) -> Result<EncryptionMaterials> {
        check_subject(subject)?;
        self.ensure_open()?;
        let material = self.store.get_or_create(subject).await?;
        Ok(EncryptionMaterials {
            data_key: DataKey::from_material(&material),
            wrapped: None,
        })
    }
}

#[async_trait]
impl<S: KeyStore + ?Sized> DecryptingMaterialsProvider for DirectMaterialsProvider<S> {
    async fn decryption_keys_for(
        &self,
        subject: &str,
        address: &KeyAddress,
    ) -> Result<DecryptionMaterials> {
        check_subject(subject)?;
        self.ensure_open()?;
        if let KeyAddress::Wrapped { .. } = address {
            return Err(CryptoError::key_unwrap(
                subject,
                "payload carries a wrapped data key but materials are direct",
            ));
        }

        let Some(material) = self.store.get(subject).await? else {
            debug!(subject, backend = self.store.backend(), "no key material");
            return Err(CryptoError::missing(subject));
        };

        #[cfg(feature = "metrics")]
        counter!(keystore_metrics::LOOKUPS_TOTAL, labels::BACKEND => self.store.backend())
            .increment(1);

        Ok(DecryptionMaterials {
            data_key: DataKey::from_material(&material),
        })
    }
}

#[async_trait]
impl<S: KeyStore + ?Sized> MaterialsProvider for DirectMaterialsProvider<S> {
    fn mode(&self) -> &'static str {
        "direct"
    }

    async fn shred(&self, subject: &str) -> Result<bool> {
        check_subject(subject)?;
        self.ensure_open()?;
        Ok(self.store.delete(subject).await?)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.store.close().await;
            info!(mode = "direct", "materials provider closed");
        }
    }
}

// ── Envelope ────────────────────────────────────────────────────────────────

/// A fresh data key per payload, wrapped under the subject's KEK.
pub struct EnvelopeMaterialsProvider<K: KeyEncryptionService + ?Sized = dyn KeyEncryptionService> {
    kek: Arc<K>,
    algorithm: KeyAlgorithm,
    closed: AtomicBool,
}

impl<K: KeyEncryptionService + ?Sized> EnvelopeMaterialsProvider<K> {
    /// `algorithm` is the data key algorithm, independent of the KEK's.
    pub fn new(kek: Arc<K>, algorithm: KeyAlgorithm) -> Self {
        Self {
            kek,
            algorithm,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CryptoError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl<K: KeyEncryptionService + ?Sized> EncryptingMaterialsProvider for EnvelopeMaterialsProvider<K> {
    async fn encryption_keys_for(&self, subject: &str) -> Result<EncryptionMaterials> {
        check_subject(subject)?;
        self.ensure_open()?;

        let data_key = DataKey::generate(subject, self.algorithm);
        let context = encryption_context(subject);
        let wrapped_data_key = self.kek.wrap(subject, &data_key.to_bytes(), &context).await?;

        Ok(EncryptionMaterials {
            data_key,
            wrapped: Some(WrappedKey {
                wrapped_data_key,
                encryption_context: context,
            }),
        })
    }
}

#[async_trait]
impl<K: KeyEncryptionService + ?Sized> DecryptingMaterialsProvider for EnvelopeMaterialsProvider<K> {
    async fn decryption_keys_for(
        &self,
        subject: &str,
        address: &KeyAddress,
    ) -> Result<DecryptionMaterials> {
        check_subject(subject)?;
        self.ensure_open()?;

        let KeyAddress::Wrapped {
            wrapped_data_key,
            encryption_context: found,
        } = address
        else {
            return Err(CryptoError::key_unwrap(
                subject,
                "envelope materials need a wrapped data key",
            ));
        };

        let expected = encryption_context(subject);
        if *found != expected {
            return Err(CryptoError::ContextMismatch {
                subject: subject.to_string(),
                expected,
                found: found.clone(),
            });
        }

        let key_bytes = self.kek.unwrap(subject, wrapped_data_key, found).await?;
        let data_key = DataKey::from_bytes(subject, &key_bytes)
            .ok_or_else(|| CryptoError::key_unwrap(subject, "unwrapped data key is malformed"))?;

        Ok(DecryptionMaterials { data_key })
    }
}

#[async_trait]
impl<K: KeyEncryptionService + ?Sized> MaterialsProvider for EnvelopeMaterialsProvider<K> {
    fn mode(&self) -> &'static str {
        "envelope"
    }

    async fn shred(&self, subject: &str) -> Result<bool> {
        check_subject(subject)?;
        self.ensure_open()?;
        self.kek.delete(subject).await
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.kek.close().await;
            info!(mode = "envelope", kek = self.kek.name(), "materials provider closed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::kek::LocalKeyEncryptionService,
        shredder_keystore::InMemoryKeyStore,
    };

    fn direct() -> DirectMaterialsProvider<InMemoryKeyStore> {
        DirectMaterialsProvider::new(Arc::new(InMemoryKeyStore::new()))
    }

    fn envelope() -> EnvelopeMaterialsProvider {
        let store: Arc<dyn KeyStore> = Arc::new(InMemoryKeyStore::new());
        let kek: Arc<dyn KeyEncryptionService> = Arc::new(LocalKeyEncryptionService::new(store));
        EnvelopeMaterialsProvider::new(kek, KeyAlgorithm::XChaCha20)
    }

    fn address(materials: &EncryptionMaterials) -> KeyAddress {
        match &materials.wrapped {
            Some(w) => KeyAddress::Wrapped {
                wrapped_data_key: w.wrapped_data_key.clone(),
                encryption_context: w.encryption_context.clone(),
            },
            None => KeyAddress::Subject,
        }
    }

    #[tokio::test]
    async fn direct_reuses_subject_key() {
        let provider = direct();
        let a = provider.encryption_keys_for("alice").await.unwrap();
        let b = provider.encryption_keys_for("alice").await.unwrap();
        assert!(a.wrapped.is_none());
        assert_eq!(a.data_key.to_bytes(), b.data_key.to_bytes());

        let d = provider
            .decryption_keys_for("alice", &KeyAddress::Subject)
            .await
            .unwrap();
        assert_eq!(d.data_key.to_bytes(), a.data_key.to_bytes());
    }

    #[tokio::test]
    async fn direct_decrypt_never_creates() {
        let provider = direct();
        let err = provider
            .decryption_keys_for("nobody", &KeyAddress::Subject)
            .await
            .unwrap_err();
        assert!(err.is_missing_material());
        assert!(provider.store.is_empty());
    }

    #[tokio::test]
    async fn envelope_issues_fresh_data_keys() {
        let provider = envelope();
        let a = provider.encryption_keys_for("alice").await.unwrap();
        let b = provider.encryption_keys_for("alice").await.unwrap();
        assert_ne!(a.data_key.to_bytes(), b.data_key.to_bytes());
        assert_eq!(
            a.wrapped.as_ref().unwrap().encryption_context,
            "subject=alice"
        );

        let d = provider
            .decryption_keys_for("alice", &address(&a))
            .await
            .unwrap();
        assert_eq!(d.data_key.to_bytes(), a.data_key.to_bytes());
        assert_eq!(d.data_key.algorithm(), KeyAlgorithm::XChaCha20);
    }

    #[tokio::test]
    async fn envelope_rejects_foreign_context() {
        let provider = envelope();
        let a = provider.encryption_keys_for("alice").await.unwrap();
        let err = provider
            .decryption_keys_for("bob", &address(&a))
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::ContextMismatch { .. }));
    }

    #[tokio::test]
    async fn envelope_rejects_corrupted_wrapped_key() {
        let provider = envelope();
        let a = provider.encryption_keys_for("alice").await.unwrap();
        let KeyAddress::Wrapped {
            mut wrapped_data_key,
            encryption_context,
        } = address(&a)
        else {
            unreachable!()
        };
        wrapped_data_key.truncate(wrapped_data_key.len() / 2);
        let err = provider
            .decryption_keys_for("alice", &KeyAddress::Wrapped {
                wrapped_data_key,
                encryption_context,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyUnwrap { .. }));
    }

    #[tokio::test]
    async fn modes_do_not_mix() {
        let err = envelope()
            .decryption_keys_for("alice", &KeyAddress::Subject)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyUnwrap { .. }));

        let err = direct()
            .decryption_keys_for("alice", &KeyAddress::Wrapped {
                wrapped_data_key: vec![1],
                encryption_context: "subject=alice".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyUnwrap { .. }));
    }

    #[tokio::test]
    async fn shred_then_missing() {
        let provider = envelope();
        let a = provider.encryption_keys_for("carol").await.unwrap();
        assert!(provider.shred("carol").await.unwrap());
        let err = provider
            .decryption_keys_for("carol", &address(&a))
            .await
            .unwrap_err();
        assert!(err.is_missing_material());
    }

    #[tokio::test]
    async fn empty_subject_rejected() {
        let err = direct().encryption_keys_for("").await.unwrap_err();
        assert!(matches!(err, CryptoError::Store(StoreError::EmptySubject)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let provider = envelope();
        provider.close().await;
        provider.close().await;
        assert!(matches!(
            provider.encryption_keys_for("dave").await,
            Err(CryptoError::Closed)
        ));
    }
}

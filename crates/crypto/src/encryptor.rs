//! Encryptor / decryptor: materials provider plus cipher engine.

use std::sync::Arc;

#[cfg(feature = "metrics")]
use std::time::Instant;

use {async_trait::async_trait, tracing::debug};

#[cfg(feature = "metrics")]
use shredder_metrics::{
    counter, decryption as decryption_metrics, encryption as encryption_metrics, histogram, labels,
};

use crate::{
    Result,
    engine::CipherEngine,
    envelope::{EncryptedEnvelope, EnvelopeMetadata},
    error::CryptoError,
    materials::{DecryptingMaterialsProvider, EncryptingMaterialsProvider, KeyAddress},
};

/// Seals one payload for one subject.
#[async_trait]
pub trait Encryptor: Send + Sync {
    /// The envelope carries everything but the key needed to open it again.
    /// The subject doubles as additional authenticated data.
    async fn encrypt(&self, subject: &str, plaintext: Vec<u8>) -> Result<EncryptedEnvelope>;
}

/// Opens envelopes produced by an [`Encryptor`].
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Fails with [`CryptoError::ContextMismatch`] if the envelope belongs to
    /// another subject and with [`CryptoError::MissingMaterial`] once the
    /// subject has been shredded.
    async fn decrypt(&self, subject: &str, envelope: &EncryptedEnvelope) -> Result<Vec<u8>>;
}

/// Runs `f` on the blocking pool. Cipher work on large payloads would
/// otherwise stall the runtime.
async fn offload<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CryptoError::Worker(e.to_string()))?
}

pub struct EnvelopeEncryptor<P: EncryptingMaterialsProvider + ?Sized> {
    provider: Arc<P>,
}

impl<P: EncryptingMaterialsProvider + ?Sized> EnvelopeEncryptor<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    async fn seal(&self, subject: &str, plaintext: Vec<u8>) -> Result<EncryptedEnvelope> {
        let materials = self.provider.encryption_keys_for(subject).await?;
        let transform = CipherEngine::for_encryption(materials.data_key);
        let transformation = transform.transformation();

        let aad = subject.as_bytes().to_vec();
        let sealed = offload(move || transform.apply(&plaintext, &aad)).await?;

        let metadata = match materials.wrapped {
            Some(wrapped) => EnvelopeMetadata::Wrapped {
                transformation: transformation.to_string(),
                initialization_vector: sealed.iv,
                wrapped_data_key: wrapped.wrapped_data_key,
                encryption_context: wrapped.encryption_context,
            },
            None => EnvelopeMetadata::Direct {
                transformation: transformation.to_string(),
                initialization_vector: sealed.iv,
            },
        };
        Ok(EncryptedEnvelope::new(subject, sealed.ciphertext, metadata))
    }
}

#[async_trait]
impl<P: EncryptingMaterialsProvider + ?Sized> Encryptor for EnvelopeEncryptor<P> {
    async fn encrypt(&self, subject: &str, plaintext: Vec<u8>) -> Result<EncryptedEnvelope> {
        #[cfg(feature = "metrics")]
        let (start, len) = (Instant::now(), plaintext.len() as u64);

        let result = self.seal(subject, plaintext).await;

        #[cfg(feature = "metrics")]
        match &result {
            Ok(envelope) => {
                let transformation = envelope.transformation().to_string();
                counter!(encryption_metrics::OPERATIONS_TOTAL, labels::TRANSFORMATION => transformation.clone())
                    .increment(1);
                counter!(encryption_metrics::PLAINTEXT_BYTES_TOTAL).increment(len);
                histogram!(encryption_metrics::DURATION_SECONDS, labels::TRANSFORMATION => transformation)
                    .record(start.elapsed().as_secs_f64());
            },
            Err(e) => {
                counter!(encryption_metrics::ERRORS_TOTAL, labels::ERROR_KIND => e.kind()).increment(1);
            },
        }

        if let Err(e) = &result {
            debug!(subject, error = %e, "encryption failed");
        }
        result
    }
}

pub struct EnvelopeDecryptor<P: DecryptingMaterialsProvider + ?Sized> {
    provider: Arc<P>,
}

impl<P: DecryptingMaterialsProvider + ?Sized> EnvelopeDecryptor<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    async fn open(&self, subject: &str, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        if envelope.subject_id() != subject {
            return Err(CryptoError::ContextMismatch {
                subject: subject.to_string(),
                expected: subject.to_string(),
                found: envelope.subject_id().to_string(),
            });
        }

        let materials = self
            .provider
            .decryption_keys_for(subject, &KeyAddress::from(envelope))
            .await?;
        let transform = CipherEngine::for_decryption(
            materials.data_key,
            envelope.transformation(),
            envelope.initialization_vector(),
        )?;

        let ciphertext = envelope.data().to_vec();
        let aad = subject.as_bytes().to_vec();
        offload(move || transform.apply(&ciphertext, &aad)).await
    }
}

#[async_trait]
impl<P: DecryptingMaterialsProvider + ?Sized> Decryptor for EnvelopeDecryptor<P> {
    async fn decrypt(&self, subject: &str, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let result = self.open(subject, envelope).await;

        #[cfg(feature = "metrics")]
        match &result {
            Ok(_) => {
                let transformation = envelope.transformation().to_string();
                counter!(decryption_metrics::OPERATIONS_TOTAL, labels::TRANSFORMATION => transformation.clone())
                    .increment(1);
                histogram!(decryption_metrics::DURATION_SECONDS, labels::TRANSFORMATION => transformation)
                    .record(start.elapsed().as_secs_f64());
            },
            Err(e) if e.is_missing_material() => {
                counter!(decryption_metrics::MISSING_MATERIAL_TOTAL).increment(1);
            },
            Err(e) => {
                counter!(decryption_metrics::ERRORS_TOTAL, labels::ERROR_KIND => e.kind()).increment(1);
            },
        }

        if let Err(e) = &result {
            debug!(subject, error = %e, "decryption failed");
        }
        result
    }
}

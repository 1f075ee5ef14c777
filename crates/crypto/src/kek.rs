//! Key encryption services: where subject KEKs live and how data keys are
//! wrapped under them.

use std::sync::Arc;

use {
    async_trait::async_trait,
    shredder_keystore::KeyStore,
    tracing::debug,
    zeroize::Zeroizing,
};

use crate::{
    Result,
    engine::cipher_for,
    error::CryptoError,
    key_wrap::{unwrap_key, wrap_key},
};

/// Wraps and unwraps data keys under a per-subject key-encryption key.
///
/// Deleting a subject's KEK makes every data key wrapped under it, and so
/// every payload sealed with those data keys, unrecoverable.
#[async_trait]
pub trait KeyEncryptionService: Send + Sync {
    /// Short name for logs and metric labels.
    fn name(&self) -> &'static str;

    /// Wrap `key_bytes` under the subject's KEK, creating the KEK if needed.
    async fn wrap(&self, subject: &str, key_bytes: &[u8], context: &str) -> Result<Vec<u8>>;

    /// Unwrap a blob produced by [`wrap`](Self::wrap). Fails with
    /// [`CryptoError::MissingMaterial`] when the subject has no KEK.
    async fn unwrap(
        &self,
        subject: &str,
        wrapped: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// Delete the subject's KEK. Returns whether one existed.
    async fn delete(&self, subject: &str) -> Result<bool>;

    /// Release resources. Idempotent.
    async fn close(&self);
}

/// KEKs held in a [`KeyStore`]; wrapping runs in process.
pub struct LocalKeyEncryptionService<S: KeyStore + ?Sized = dyn KeyStore> {
    store: Arc<S>,
}

impl<S: KeyStore + ?Sized> LocalKeyEncryptionService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: KeyStore + ?Sized> KeyEncryptionService for LocalKeyEncryptionService<S> {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn wrap(&self, subject: &str, key_bytes: &[u8], context: &str) -> Result<Vec<u8>> {
        let kek = self.store.get_or_create(subject).await?;
        wrap_key(cipher_for(kek.algorithm()), kek.key(), key_bytes, context)
            .map_err(|e| CryptoError::cipher(subject, e.0))
    }

    async fn unwrap(
        &self,
        subject: &str,
        wrapped: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let kek = self
            .store
            .get(subject)
            .await?
            .ok_or_else(|| CryptoError::missing(subject))?;
        unwrap_key(cipher_for(kek.algorithm()), kek.key(), wrapped, context)
            .map_err(|e| CryptoError::key_unwrap(subject, e.0))
    }

    async fn delete(&self, subject: &str) -> Result<bool> {
        let removed = self.store.delete(subject).await?;
        debug!(subject, removed, backend = self.store.backend(), "deleted local KEK");
        Ok(removed)
    }

    async fn close(&self) {
        self.store.close().await;
    }
}

//! Key store trait.

use async_trait::async_trait;

use crate::{Result, material::KeyMaterial};

/// Per-subject key material storage.
///
/// Subject lifecycle: no material, then active after the first
/// [`get_or_create`](Self::get_or_create), then deleted by
/// [`delete`](Self::delete). A later `get_or_create` starts over with fresh,
/// unrelated material.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Short backend name for logs and metric labels.
    fn backend(&self) -> &'static str;

    /// Return the subject's material, creating it if absent.
    ///
    /// Concurrent first calls for the same subject must all observe the same
    /// material: exactly one creation wins.
    async fn get_or_create(&self, subject: &str) -> Result<KeyMaterial>;

    /// Return the subject's material without creating it.
    async fn get(&self, subject: &str) -> Result<Option<KeyMaterial>>;

    /// Delete the subject's material. Returns whether anything was removed.
    async fn delete(&self, subject: &str) -> Result<bool>;

    /// Release backend resources. Idempotent; later calls fail with
    /// [`StoreError::Closed`](crate::StoreError::Closed).
    async fn close(&self);
}

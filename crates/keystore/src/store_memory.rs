//! In-memory key store.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    async_trait::async_trait,
    dashmap::{DashMap, mapref::entry::Entry},
    tracing::debug,
};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, keystore as keystore_metrics};

use crate::{
    Result, StoreError,
    error::check_subject,
    material::{KeyAlgorithm, KeyMaterial},
    store::KeyStore,
};

/// Key store backed by a `DashMap`. Nothing survives the process.
///
/// Create-or-get goes through the map's entry API, which holds the shard lock
/// for the subject, so concurrent first uses agree on one material.
pub struct InMemoryKeyStore {
    keys: DashMap<String, KeyMaterial>,
    algorithm: KeyAlgorithm,
    closed: AtomicBool,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::with_algorithm(KeyAlgorithm::default())
    }

    /// Store that generates material for `algorithm`.
    pub fn with_algorithm(algorithm: KeyAlgorithm) -> Self {
        Self {
            keys: DashMap::new(),
            algorithm,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of subjects with active material.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_or_create(&self, subject: &str) -> Result<KeyMaterial> {
        check_subject(subject)?;
        self.ensure_open()?;

        match self.keys.entry(subject.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let material = KeyMaterial::generate(subject, self.algorithm);
                debug!(subject, id = %material.id(), "created key material");

                #[cfg(feature = "metrics")]
                counter!(keystore_metrics::MATERIAL_CREATED_TOTAL, "backend" => "memory")
                    .increment(1);

                Ok(entry.insert(material).clone())
            },
        }
    }

    async fn get(&self, subject: &str) -> Result<Option<KeyMaterial>> {
        check_subject(subject)?;
        self.ensure_open()?;
        Ok(self.keys.get(subject).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, subject: &str) -> Result<bool> {
        check_subject(subject)?;
        self.ensure_open()?;
        let removed = self.keys.remove(subject).is_some();
        if removed {
            debug!(subject, "deleted key material");

            #[cfg(feature = "metrics")]
            counter!(keystore_metrics::MATERIAL_SHREDDED_TOTAL, "backend" => "memory")
                .increment(1);
        }
        Ok(removed)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.keys.clear();
            debug!("in-memory key store closed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    #[tokio::test]
    async fn get_never_creates() {
        let store = InMemoryKeyStore::new();
        assert!(store.get("alice").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn get_or_create_reuses_material() {
        let store = InMemoryKeyStore::new();
        let first = store.get_or_create("alice").await.unwrap();
        let second = store.get_or_create("alice").await.unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(first.key(), second.key());
        assert_eq!(store.get("alice").await.unwrap().unwrap().id(), first.id());
    }

    #[tokio::test]
    async fn subjects_get_distinct_material() {
        let store = InMemoryKeyStore::new();
        let alice = store.get_or_create("alice").await.unwrap();
        let bob = store.get_or_create("bob").await.unwrap();
        assert_ne!(alice.key(), bob.key());
    }

    #[tokio::test]
    async fn delete_then_recreate_is_fresh() {
        let store = InMemoryKeyStore::new();
        let old = store.get_or_create("alice").await.unwrap();
        assert!(store.delete("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
        assert!(store.get("alice").await.unwrap().is_none());

        let fresh = store.get_or_create("alice").await.unwrap();
        assert_ne!(old.id(), fresh.id());
        assert_ne!(old.key(), fresh.key());
    }

    #[tokio::test]
    async fn empty_subject_rejected() {
        let store = InMemoryKeyStore::new();
        assert!(matches!(
            store.get_or_create("").await,
            Err(StoreError::EmptySubject)
        ));
    }

    #[tokio::test]
    async fn concurrent_first_use_agrees() {
        let store = Arc::new(InMemoryKeyStore::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.get_or_create("contended").await.unwrap().id()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let store = InMemoryKeyStore::new();
        store.get_or_create("alice").await.unwrap();
        store.close().await;
        store.close().await;
        assert!(matches!(store.get("alice").await, Err(StoreError::Closed)));
        assert!(matches!(
            store.get_or_create("alice").await,
            Err(StoreError::Closed)
        ));
    }
}

//! SQLite-backed key store using sqlx.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tracing::{debug, info},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, keystore as keystore_metrics};

use crate::{
    Result, StoreError,
    error::check_subject,
    material::{KeyAlgorithm, KeyMaterial},
    store::KeyStore,
};

/// Durable key store.
///
/// Create-or-get inserts a candidate row with `ON CONFLICT DO NOTHING` and
/// reads back whatever row is stored, so the first committed insert wins for
/// every caller in every process sharing the database.
pub struct SqliteKeyStore {
    pool: SqlitePool,
    algorithm: KeyAlgorithm,
    closed: AtomicBool,
}

impl SqliteKeyStore {
    /// Connect with a dedicated pool and run migrations.
    pub async fn new(database_url: &str, algorithm: KeyAlgorithm) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;
        info!(backend = "sqlite", "key store ready");

        Ok(Self::with_pool(pool, algorithm))
    }

    /// Use an existing pool. Call [`crate::run_migrations`] first.
    pub fn with_pool(pool: SqlitePool, algorithm: KeyAlgorithm) -> Self {
        Self {
            pool,
            algorithm,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn load(&self, subject: &str) -> Result<Option<KeyMaterial>> {
        let row = sqlx::query(
            "SELECT id, algorithm, key_material, created_at_ms FROM subject_keys WHERE subject = ?",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.get("id");
        let algorithm: String = row.get("algorithm");
        let key: Vec<u8> = row.get("key_material");
        let created_at_ms: i64 = row.get("created_at_ms");

        let id = Uuid::parse_str(&id).map_err(|e| StoreError::corrupt(subject, e.to_string()))?;
        let algorithm = algorithm
            .parse::<KeyAlgorithm>()
            .map_err(|e| StoreError::corrupt(subject, e))?;
        let material =
            KeyMaterial::from_slice(id, subject, algorithm, &key, created_at_ms as u64)
                .ok_or_else(|| {
                    StoreError::corrupt(subject, format!("key has {} bytes", key.len()))
                })?;
        Ok(Some(material))
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get_or_create(&self, subject: &str) -> Result<KeyMaterial> {
        check_subject(subject)?;
        self.ensure_open()?;

        if let Some(existing) = self.load(subject).await? {
            return Ok(existing);
        }

        let candidate = KeyMaterial::generate(subject, self.algorithm);
        let inserted = sqlx::query(
            "INSERT INTO subject_keys (subject, id, algorithm, key_material, created_at_ms)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(subject) DO NOTHING",
        )
        .bind(subject)
        .bind(candidate.id().to_string())
        .bind(candidate.algorithm().as_str())
        .bind(candidate.key().as_slice())
        .bind(candidate.created_at_ms() as i64)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            debug!(subject, id = %candidate.id(), "created key material");

            #[cfg(feature = "metrics")]
            counter!(keystore_metrics::MATERIAL_CREATED_TOTAL, "backend" => "sqlite")
                .increment(1);

            return Ok(candidate);
        }

        // Lost the race: someone else's row is the material.
        self.load(subject)
            .await?
            .ok_or_else(|| StoreError::corrupt(subject, "row vanished after conflicting insert"))
    }

    async fn get(&self, subject: &str) -> Result<Option<KeyMaterial>> {
        check_subject(subject)?;
        self.ensure_open()?;
        self.load(subject).await
    }

    async fn delete(&self, subject: &str) -> Result<bool> {
        check_subject(subject)?;
        self.ensure_open()?;

        let result = sqlx::query("DELETE FROM subject_keys WHERE subject = ?")
            .bind(subject)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            debug!(subject, "deleted key material");

            #[cfg(feature = "metrics")]
            counter!(keystore_metrics::MATERIAL_SHREDDED_TOTAL, "backend" => "sqlite")
                .increment(1);
        }
        Ok(removed)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pool.close().await;
            debug!("sqlite key store closed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteKeyStore {
        SqliteKeyStore::new("sqlite::memory:", KeyAlgorithm::Aes256)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_get_delete() {
        let store = test_store().await;
        assert!(store.get("alice").await.unwrap().is_none());

        let created = store.get_or_create("alice").await.unwrap();
        let loaded = store.get("alice").await.unwrap().unwrap();
        assert_eq!(created.id(), loaded.id());
        assert_eq!(created.key(), loaded.key());
        assert_eq!(loaded.algorithm(), KeyAlgorithm::Aes256);

        assert!(store.delete("alice").await.unwrap());
        assert!(!store.delete("alice").await.unwrap());
        assert!(store.get("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let store = test_store().await;
        let a = store.get_or_create("bob").await.unwrap();
        let b = store.get_or_create("bob").await.unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[tokio::test]
    async fn recreate_after_delete_is_fresh() {
        let store = test_store().await;
        let old = store.get_or_create("carol").await.unwrap();
        store.delete("carol").await.unwrap();
        let fresh = store.get_or_create("carol").await.unwrap();
        assert_ne!(old.key(), fresh.key());
    }

    #[tokio::test]
    async fn corrupt_row_is_not_absence() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO subject_keys (subject, id, algorithm, key_material, created_at_ms)
             VALUES ('mallory', 'not-a-uuid', 'aes256', x'00', 0)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let result = store.get("mallory").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = test_store().await;
        store.close().await;
        store.close().await;
        assert!(matches!(store.get("alice").await, Err(StoreError::Closed)));
    }
}

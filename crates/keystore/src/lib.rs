//! Subject-scoped key material for crypto shredding.
//!
//! Every subject (data owner) owns at most one active piece of symmetric key
//! material. Material is created lazily the first time something is encrypted
//! for the subject, looked up (never created) for decryption, and deleted to
//! make every ciphertext produced under it unrecoverable.
//!
//! Three [`KeyStore`] realizations are provided:
//!
//! - [`InMemoryKeyStore`]: a concurrent map, for tests and single-process use.
//! - [`SqliteKeyStore`]: durable SQLite table, first committed row wins.
//! - [`ReplicatedKeyStore`]: folds a shared [`CommandLog`] into a local view so
//!   a fleet of readers converges on the same material.
//!
//! [`RetryingKeyStore`] wraps any of them with bounded exponential backoff for
//! transient failures.

pub mod error;
pub mod log;
pub mod material;
pub mod replicated;
pub mod retry;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;

pub use {
    error::{Result, StoreError},
    log::{BroadcastCommandLog, CommandLog, KeyCommand, LogEntry},
    material::{KEY_LEN, KeyAlgorithm, KeyMaterial},
    replicated::{ReplicatedKeyStore, ReplicationOptions},
    retry::{RetryPolicy, RetryingKeyStore, retry},
    store::KeyStore,
    store_memory::InMemoryKeyStore,
    store_sqlite::SqliteKeyStore,
};

/// Run database migrations for the key store.
///
/// Creates the `subject_keys` table. Only needed when sharing a pool with
/// [`SqliteKeyStore::with_pool`]; [`SqliteKeyStore::new`] runs them itself.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

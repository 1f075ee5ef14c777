#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{sync::Arc, time::Duration};

use {
    futures::future::join_all,
    rstest::rstest,
    shredder_keystore::{
        BroadcastCommandLog, CommandLog, InMemoryKeyStore, KeyAlgorithm, KeyStore,
        ReplicatedKeyStore, ReplicationOptions, SqliteKeyStore,
    },
};

#[derive(Debug, Clone, Copy)]
enum Backend {
    Memory,
    Sqlite,
    Replicated,
}

async fn open(backend: Backend) -> Arc<dyn KeyStore> {
    match backend {
        Backend::Memory => Arc::new(InMemoryKeyStore::new()),
        Backend::Sqlite => Arc::new(
            SqliteKeyStore::new("sqlite::memory:", KeyAlgorithm::Aes256)
                .await
                .unwrap(),
        ),
        Backend::Replicated => {
            let log: Arc<dyn CommandLog> = Arc::new(BroadcastCommandLog::new());
            Arc::new(ReplicatedKeyStore::start(log, ReplicationOptions {
                visibility_timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(2),
                algorithm: KeyAlgorithm::Aes256,
            }))
        },
    }
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[case::replicated(Backend::Replicated)]
#[tokio::test]
async fn subject_lifecycle(#[case] backend: Backend) {
    let store = open(backend).await;

    assert!(store.get("u1").await.unwrap().is_none());
    let active = store.get_or_create("u1").await.unwrap();
    assert_eq!(store.get("u1").await.unwrap().unwrap().id(), active.id());

    assert!(store.delete("u1").await.unwrap());
    assert!(store.get("u1").await.unwrap().is_none());

    let recreated = store.get_or_create("u1").await.unwrap();
    assert_ne!(recreated.key(), active.key());

    store.close().await;
    store.close().await;
}

#[rstest]
#[case::memory(Backend::Memory)]
#[case::sqlite(Backend::Sqlite)]
#[case::replicated(Backend::Replicated)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_yields_one_material(#[case] backend: Backend) {
    let store = open(backend).await;

    let calls = (0..16).map(|_| {
        let store = Arc::clone(&store);
        async move { store.get_or_create("fresh-subject").await.unwrap() }
    });
    let results = join_all(calls).await;

    let first = &results[0];
    for material in &results {
        assert_eq!(material.id(), first.id());
        assert_eq!(material.key(), first.key());
    }
}

#[tokio::test]
async fn sqlite_stores_sharing_a_file_agree() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("keys.db").display());

    let a = SqliteKeyStore::new(&url, KeyAlgorithm::XChaCha20).await.unwrap();
    let b = SqliteKeyStore::new(&url, KeyAlgorithm::XChaCha20).await.unwrap();

    let (from_a, from_b) = tokio::join!(a.get_or_create("shared"), b.get_or_create("shared"));
    assert_eq!(from_a.unwrap().id(), from_b.unwrap().id());

    assert!(b.delete("shared").await.unwrap());
    assert!(a.get("shared").await.unwrap().is_none());
}

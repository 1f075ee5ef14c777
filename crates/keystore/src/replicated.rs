//! Key store folded from a shared command log.
//!
//! Writes go to the [`CommandLog`]; a background task folds the log into a
//! local materialized view and publishes how far it got. Every operation
//! first waits until the view has applied the log as far as the operation
//! needs (the head at call time, or past its own append), bounded by
//! [`ReplicationOptions::visibility_timeout`].

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    tokio::{sync::watch, task::JoinHandle},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, keystore as keystore_metrics};

use crate::{
    Result, StoreError,
    error::check_subject,
    log::{CommandLog, KeyCommand, LogEntry},
    material::{KeyAlgorithm, KeyMaterial},
    store::KeyStore,
};

/// Tuning for the replicated store.
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// How long an operation waits for the local view to catch up.
    pub visibility_timeout: Duration,
    /// How long the folder backs off after a failed or empty log read.
    pub poll_interval: Duration,
    /// Algorithm for newly registered material.
    pub algorithm: KeyAlgorithm,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            algorithm: KeyAlgorithm::default(),
        }
    }
}

type View = DashMap<String, KeyMaterial>;

/// Replicated key store.
///
/// Stores that share one log converge on the same view: the first
/// `Register` for a subject in log order wins, later ones are ignored until a
/// `Shred` removes it.
pub struct ReplicatedKeyStore {
    log: Arc<dyn CommandLog>,
    view: Arc<View>,
    /// Next log offset the folder will apply.
    applied: watch::Receiver<u64>,
    options: ReplicationOptions,
    folder: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ReplicatedKeyStore {
    /// Start folding `log` into a fresh local view.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(log: Arc<dyn CommandLog>, options: ReplicationOptions) -> Self {
        let view = Arc::new(View::new());
        let (applied_tx, applied) = watch::channel(0);
        let folder = tokio::spawn(fold_log(
            Arc::clone(&log),
            Arc::clone(&view),
            applied_tx,
            options.poll_interval,
        ));
        info!(backend = "replicated", "key store folding command log");

        Self {
            log,
            view,
            applied,
            options,
            folder: Mutex::new(Some(folder)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Entries written to the log so far.
    fn log_head(&self) -> u64 {
        *self.log.subscribe().borrow()
    }

    /// Wait until the folder has applied every entry before `target`.
    async fn catch_up(&self, subject: &str, target: u64) -> Result<()> {
        let mut applied = self.applied.clone();
        let reached = tokio::time::timeout(self.options.visibility_timeout, async {
            applied.wait_for(|next| *next >= target).await.map(|_| ())
        })
        .await;

        match reached {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => {
                warn!(
                    subject,
                    target,
                    applied = *self.applied.borrow(),
                    timeout = ?self.options.visibility_timeout,
                    "local view did not catch up with the command log"
                );

                #[cfg(feature = "metrics")]
                counter!(keystore_metrics::VISIBILITY_TIMEOUTS_TOTAL).increment(1);

                Err(StoreError::Timeout {
                    subject: subject.to_string(),
                    waited: self.options.visibility_timeout,
                })
            },
        }
    }

    fn lookup(&self, subject: &str) -> Option<KeyMaterial> {
        self.view.get(subject).map(|m| m.value().clone())
    }
}

#[async_trait]
impl KeyStore for ReplicatedKeyStore {
    fn backend(&self) -> &'static str {
        "replicated"
    }

    async fn get_or_create(&self, subject: &str) -> Result<KeyMaterial> {
        check_subject(subject)?;
        self.ensure_open()?;

        self.catch_up(subject, self.log_head()).await?;
        if let Some(existing) = self.lookup(subject) {
            return Ok(existing);
        }

        let candidate = KeyMaterial::generate(subject, self.options.algorithm);
        let offset = self
            .log
            .append(KeyCommand::Register {
                material: candidate,
            })
            .await?;
        debug!(subject, offset, "registered key material, waiting for view");

        // Once our entry is applied the view holds whichever registration
        // folded first after the last shred, ours or not.
        self.catch_up(subject, offset + 1).await?;
        self.lookup(subject).ok_or_else(|| {
            StoreError::log(format!(
                "material for {subject} was shredded while it was being created"
            ))
        })
    }

    async fn get(&self, subject: &str) -> Result<Option<KeyMaterial>> {
        check_subject(subject)?;
        self.ensure_open()?;
        self.catch_up(subject, self.log_head()).await?;
        Ok(self.lookup(subject))
    }

    async fn delete(&self, subject: &str) -> Result<bool> {
        check_subject(subject)?;
        self.ensure_open()?;

        self.catch_up(subject, self.log_head()).await?;
        if !self.view.contains_key(subject) {
            return Ok(false);
        }

        let offset = self
            .log
            .append(KeyCommand::Shred {
                subject: subject.to_string(),
            })
            .await?;
        debug!(subject, offset, "shred appended, waiting for view");

        self.catch_up(subject, offset + 1).await?;
        Ok(true)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self
            .folder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.view.clear();
        debug!("replicated key store closed");
    }
}

impl Drop for ReplicatedKeyStore {
    fn drop(&mut self) {
        if let Some(handle) = self
            .folder
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Apply one command to a view.
fn apply(view: &View, entry: LogEntry) {
    match entry.command {
        KeyCommand::Register { material } => {
            let subject = material.subject().to_string();
            if view.contains_key(&subject) {
                debug!(%subject, offset = entry.offset, "ignoring duplicate registration");
                return;
            }

            #[cfg(feature = "metrics")]
            counter!(keystore_metrics::MATERIAL_CREATED_TOTAL, "backend" => "replicated")
                .increment(1);

            view.insert(subject, material);
        },
        KeyCommand::Shred { subject } => {
            let removed = view.remove(&subject).is_some();
            debug!(%subject, offset = entry.offset, removed, "applied shred");

            #[cfg(feature = "metrics")]
            if removed {
                counter!(keystore_metrics::MATERIAL_SHREDDED_TOTAL, "backend" => "replicated")
                    .increment(1);
            }
        },
    }
}

/// Fold the log into `view` until the log's sender goes away, publishing
/// the next offset to apply through `applied`.
async fn fold_log(
    log: Arc<dyn CommandLog>,
    view: Arc<View>,
    applied: watch::Sender<u64>,
    backoff: Duration,
) {
    let mut head = log.subscribe();
    let mut next = 0u64;
    loop {
        let written = *head.borrow_and_update();
        while next < written {
            match log.read_from(next).await {
                Ok(entries) if entries.is_empty() => {
                    debug!(offset = next, written, "log head ahead of readable entries");
                    tokio::time::sleep(backoff).await;
                },
                Ok(entries) => {
                    for entry in entries {
                        next = entry.offset + 1;
                        apply(&view, entry);
                        applied.send_replace(next);
                    }
                },
                Err(e) => {
                    warn!(error = %e, offset = next, "failed to read command log, retrying");
                    tokio::time::sleep(backoff).await;
                },
            }
        }
        if head.changed().await.is_err() {
            debug!("command log closed, folder stopping");
            return;
        }
    }
}

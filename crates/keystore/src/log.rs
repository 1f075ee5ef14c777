//! Command log feeding the replicated key store.
//!
//! Writers append [`KeyCommand`]s; every reader folds the full sequence into
//! its own view. The log is the only source of truth, so readers that have
//! consumed the same prefix hold the same view.

use std::sync::Mutex;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::watch,
};

use crate::{Result, StoreError, material::KeyMaterial};

/// A key lifecycle command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyCommand {
    /// Register material for a subject. Ignored while the subject already has
    /// active material, so the earliest registration wins.
    Register { material: KeyMaterial },
    /// Remove the subject's active material.
    Shred { subject: String },
}

impl KeyCommand {
    pub fn subject(&self) -> &str {
        match self {
            Self::Register { material } => material.subject(),
            Self::Shred { subject } => subject,
        }
    }
}

/// A command with its position in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub offset: u64,
    pub command: KeyCommand,
}

/// Append-only, totally ordered command log.
#[async_trait]
pub trait CommandLog: Send + Sync {
    /// Append a command, returning its offset.
    async fn append(&self, command: KeyCommand) -> Result<u64>;

    /// Read every entry at or after `offset`, in order.
    async fn read_from(&self, offset: u64) -> Result<Vec<LogEntry>>;

    /// Receiver that changes whenever the log grows. The value is the number
    /// of entries written so far.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// In-process log shared by every store holding the same `Arc`.
///
/// Keeps the full history so late subscribers replay from offset zero.
pub struct BroadcastCommandLog {
    entries: Mutex<Vec<LogEntry>>,
    head: watch::Sender<u64>,
}

impl BroadcastCommandLog {
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            entries: Mutex::new(Vec::new()),
            head,
        }
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BroadcastCommandLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandLog for BroadcastCommandLog {
    async fn append(&self, command: KeyCommand) -> Result<u64> {
        if command.subject().is_empty() {
            return Err(StoreError::EmptySubject);
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let offset = entries.len() as u64;
        entries.push(LogEntry { offset, command });
        self.head.send_replace(offset + 1);
        Ok(offset)
    }

    async fn read_from(&self, offset: u64) -> Result<Vec<LogEntry>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let start = usize::try_from(offset)
            .map_err(|_| StoreError::log(format!("offset {offset} out of range")))?;
        Ok(entries.get(start..).map(<[LogEntry]>::to_vec).unwrap_or_default())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::material::KeyAlgorithm};

    #[tokio::test]
    async fn appends_are_ordered() {
        let log = BroadcastCommandLog::new();
        let material = KeyMaterial::generate("alice", KeyAlgorithm::Aes256);
        assert_eq!(log.append(KeyCommand::Register { material }).await.unwrap(), 0);
        assert_eq!(
            log.append(KeyCommand::Shred {
                subject: "alice".into()
            })
            .await
            .unwrap(),
            1
        );

        let all = log.read_from(0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(matches!(all[1].command, KeyCommand::Shred { .. }));

        let tail = log.read_from(1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert!(log.read_from(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_head_move() {
        let log = BroadcastCommandLog::new();
        let mut rx = log.subscribe();
        assert_eq!(*rx.borrow_and_update(), 0);

        log.append(KeyCommand::Shred {
            subject: "bob".into(),
        })
        .await
        .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn commands_serialize_with_type_tag() {
        let json = serde_json::to_value(KeyCommand::Shred {
            subject: "carol".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "shred");
        assert_eq!(json["subject"], "carol");
    }
}

//! Key store error types.

use std::time::Duration;

/// Errors produced by key stores.
///
/// "No material for this subject" is not an error here: lookups return
/// `Ok(None)` and callers decide what absence means.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Subjects must be non-empty.
    #[error("subject identifier must not be empty")]
    EmptySubject,

    /// The store was closed.
    #[error("key store is closed")]
    Closed,

    /// A replicated write did not become visible in the local view in time.
    #[error("key material for subject {subject} not visible after {waited:?}")]
    Timeout { subject: String, waited: Duration },

    /// Persisted material could not be decoded.
    #[error("corrupt key material for subject {subject}: {reason}")]
    Corrupt { subject: String, reason: String },

    /// The command log rejected an append or read.
    #[error("command log error: {message}")]
    Log { message: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn corrupt(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Timeouts and backend I/O are transient; closed stores, bad input and
    /// corrupt rows are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Log { .. } => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Database(_)
            ),
            Self::EmptySubject
            | Self::Closed
            | Self::Corrupt { .. }
            | Self::Migrate(_)
            | Self::Json(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Reject empty subjects before touching any backend.
pub(crate) fn check_subject(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(StoreError::EmptySubject);
    }
    Ok(())
}

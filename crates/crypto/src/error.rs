//! Crypto error types.

use shredder_keystore::StoreError;

/// Errors produced while resolving key material or running a cipher.
///
/// Every variant that concerns one subject names it, so a failure deep inside
/// a per-field fan-out can still be traced back to its data owner.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// No key material exists for the subject, either because nothing was
    /// ever encrypted for it or because it has been shredded.
    #[error("no key material for subject {subject}")]
    MissingMaterial { subject: String },

    /// Encryption or decryption failed (tampered data, wrong key, bad IV).
    #[error("cipher error for subject {subject}: {reason}")]
    Cipher { subject: String, reason: String },

    /// A wrapped data key could not be unwrapped.
    #[error("failed to unwrap data key for subject {subject}: {reason}")]
    KeyUnwrap { subject: String, reason: String },

    /// Stored context does not belong to the requested subject.
    #[error("context mismatch for subject {subject}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        subject: String,
        expected: String,
        found: String,
    },

    /// The envelope names a transformation no cipher implements.
    #[error("unsupported transformation: {transformation}")]
    UnsupportedTransformation { transformation: String },

    /// The key encryption service rejected or failed a request.
    #[error("kms {operation} failed{}: {message}", http_status(.status))]
    Kms {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Key store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The blocking cipher task was cancelled or panicked.
    #[error("cipher worker failed: {0}")]
    Worker(String),

    /// The provider or service was closed.
    #[error("crypto provider is closed")]
    Closed,

    /// Settings cannot produce a working shredder.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CryptoError {
    #[must_use]
    pub fn cipher(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cipher {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn key_unwrap(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyUnwrap {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn missing(subject: impl Into<String>) -> Self {
        Self::MissingMaterial {
            subject: subject.into(),
        }
    }

    #[must_use]
    pub fn kms(operation: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Kms {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Whether the failure is "this subject has no key", as opposed to a
    /// cipher, format or backend problem.
    #[must_use]
    pub fn is_missing_material(&self) -> bool {
        matches!(self, Self::MissingMaterial { .. })
    }

    /// Whether retrying the same operation later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Kms { status, .. } => status.is_none_or(|s| s >= 500 || s == 429),
            _ => false,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingMaterial { .. } => "missing_material",
            Self::Cipher { .. } => "cipher",
            Self::KeyUnwrap { .. } => "key_unwrap",
            Self::ContextMismatch { .. } => "context_mismatch",
            Self::UnsupportedTransformation { .. } => "unsupported_transformation",
            Self::Kms { .. } => "kms",
            Self::Store(_) => "store",
            Self::Worker(_) => "worker",
            Self::Closed => "closed",
            Self::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[test]
    fn missing_material_is_distinguishable() {
        assert!(CryptoError::missing("alice").is_missing_material());
        assert!(!CryptoError::cipher("alice", "tag mismatch").is_missing_material());
    }

    #[test]
    fn retryable_classification() {
        assert!(CryptoError::kms("encrypt", Some(503), "sealed").is_retryable());
        assert!(CryptoError::kms("encrypt", None, "connection refused").is_retryable());
        assert!(!CryptoError::kms("encrypt", Some(403), "permission denied").is_retryable());
        assert!(
            CryptoError::from(StoreError::Timeout {
                subject: "alice".into(),
                waited: Duration::from_secs(1),
            })
            .is_retryable()
        );
        assert!(!CryptoError::from(StoreError::Closed).is_retryable());
        assert!(!CryptoError::missing("alice").is_retryable());
    }

    #[test]
    fn kms_message_includes_status() {
        let err = CryptoError::kms("decrypt", Some(500), "internal error");
        assert_eq!(err.to_string(), "kms decrypt failed (HTTP 500): internal error");
        let err = CryptoError::kms("decrypt", None, "timed out");
        assert_eq!(err.to_string(), "kms decrypt failed: timed out");
    }
}

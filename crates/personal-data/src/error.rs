//! Schema-shape and per-message errors.

use shredder_crypto::CryptoError;

/// The schema cannot be used for personal-data processing. Detected once per
/// schema shape; retrying does not help.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("[{strategy}] no subject identifier found for personal data at {path}")]
    SubjectIdentifierNotFound { strategy: &'static str, path: String },

    #[error("[{strategy}] {count} subject identifiers found for personal data at {path}, expected one")]
    TooManySubjectIdentifiers {
        strategy: &'static str,
        path: String,
        count: usize,
    },

    #[error("personal data at {path} has no encrypted personal data field")]
    EncryptionTargetFieldNotFound { path: String },

    #[error("personal data at {path} has {count} encrypted personal data fields, expected one")]
    TooManyEncryptionTargetFields { path: String, count: usize },

    #[error("unknown field {field} in {schema}")]
    UnknownField { schema: String, field: String },

    #[error("unknown oneof {oneof} in {schema}")]
    UnknownOneof { schema: String, oneof: String },

    #[error("duplicate field {field} in {schema}")]
    DuplicateField { schema: String, field: String },

    #[error("{path} holds {expected}, got {found}")]
    KindMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("metadata for {expected} applied to a {found} message")]
    SchemaMismatch { expected: String, found: String },
}

/// A single message could not be encrypted or decrypted.
#[derive(Debug, thiserror::Error)]
pub enum PersonalDataError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The subject identifier field is unset or empty on this message.
    #[error("subject identifier {path} unavailable: {reason}")]
    SubjectUnavailable { path: String, reason: String },

    /// The encrypted field holds something other than an envelope.
    #[error("expected an encrypted envelope at {path}, found {found}")]
    UnexpectedValueShape { path: String, found: &'static str },

    /// Decrypted bytes do not restore a field of the container.
    #[error("invalid encrypted message at {path}: {reason}")]
    InvalidEncryptedMessage { path: String, reason: String },

    /// The set value could not be serialized for encryption.
    #[error("failed to encode {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("crypto failure at {field}: {source}")]
    Crypto {
        field: String,
        #[source]
        source: CryptoError,
    },
}

impl PersonalDataError {
    /// Whether the underlying failure is missing key material, typically a
    /// shredded subject.
    #[must_use]
    pub fn is_missing_material(&self) -> bool {
        matches!(self, Self::Crypto { source, .. } if source.is_missing_material())
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Crypto { source, .. } if source.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, PersonalDataError>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_errors_name_strategy_and_path() {
        let err = SchemaError::TooManySubjectIdentifiers {
            strategy: "sibling-field-flag",
            path: "Person.contact_info".into(),
            count: 2,
        };
        let message = err.to_string();
        assert!(message.contains("sibling-field-flag"));
        assert!(message.contains("Person.contact_info"));
        assert!(message.contains('2'));
    }

    #[test]
    fn missing_material_passes_through() {
        let err = PersonalDataError::Crypto {
            field: "Person.contact_info".into(),
            source: CryptoError::missing("u1"),
        };
        assert!(err.is_missing_material());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Person.contact_info"));
    }
}

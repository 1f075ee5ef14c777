//! Metric name and label definitions.
//!
//! All metric names recorded by the shredder crates live here.

/// Field and payload encryption
pub mod encryption {
    /// Payloads encrypted by an encryptor
    pub const OPERATIONS_TOTAL: &str = "shredder_encryption_operations_total";
    /// Encryption failures (missing material, cipher, store)
    pub const ERRORS_TOTAL: &str = "shredder_encryption_errors_total";
    /// Time spent resolving material and sealing one payload, in seconds
    pub const DURATION_SECONDS: &str = "shredder_encryption_duration_seconds";
    /// Plaintext bytes fed into the cipher
    pub const PLAINTEXT_BYTES_TOTAL: &str = "shredder_encryption_plaintext_bytes_total";
}

/// Field and payload decryption
pub mod decryption {
    /// Payloads decrypted by a decryptor
    pub const OPERATIONS_TOTAL: &str = "shredder_decryption_operations_total";
    /// Decryption failures
    pub const ERRORS_TOTAL: &str = "shredder_decryption_errors_total";
    /// Decryptions refused because the subject's key was missing or shredded
    pub const MISSING_MATERIAL_TOTAL: &str = "shredder_decryption_missing_material_total";
    /// Time spent resolving material and opening one payload, in seconds
    pub const DURATION_SECONDS: &str = "shredder_decryption_duration_seconds";
}

/// Key material lifecycle
pub mod keystore {
    /// New subject key material created
    pub const MATERIAL_CREATED_TOTAL: &str = "shredder_keystore_material_created_total";
    /// Subject key material deleted (crypto shredding)
    pub const MATERIAL_SHREDDED_TOTAL: &str = "shredder_keystore_material_shredded_total";
    /// Lookups that hit existing material
    pub const LOOKUPS_TOTAL: &str = "shredder_keystore_lookups_total";
    /// Replicated-view waits that gave up
    pub const VISIBILITY_TIMEOUTS_TOTAL: &str = "shredder_keystore_visibility_timeouts_total";
    /// Store operations retried after a transient failure
    pub const RETRIES_TOTAL: &str = "shredder_keystore_retries_total";
}

/// Remote key encryption service (transit engine)
pub mod kms {
    /// HTTP requests sent to the key encryption service
    pub const REQUESTS_TOTAL: &str = "shredder_kms_requests_total";
    /// Failed requests (after retries)
    pub const ERRORS_TOTAL: &str = "shredder_kms_errors_total";
}

/// Personal-data metadata analysis
pub mod metadata {
    /// Schemas analyzed (cache misses)
    pub const SCHEMAS_ANALYZED_TOTAL: &str = "shredder_metadata_schemas_analyzed_total";
    /// Cached metadata served
    pub const CACHE_HITS_TOTAL: &str = "shredder_metadata_cache_hits_total";
    /// Personal-data fields swapped to encrypted form
    pub const FIELDS_ENCRYPTED_TOTAL: &str = "shredder_metadata_fields_encrypted_total";
    /// Personal-data fields swapped back to plaintext form
    pub const FIELDS_DECRYPTED_TOTAL: &str = "shredder_metadata_fields_decrypted_total";
    /// Containers skipped because nothing was set
    pub const FIELDS_SKIPPED_TOTAL: &str = "shredder_metadata_fields_skipped_total";
}

/// Common label keys
pub mod labels {
    pub const MODE: &str = "mode";
    pub const TRANSFORMATION: &str = "transformation";
    pub const BACKEND: &str = "backend";
    pub const ERROR_KIND: &str = "error_kind";
    pub const SCHEMA: &str = "schema";
    pub const OPERATION: &str = "operation";
}

/// Histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Crypto operation duration buckets (in seconds).
    /// Covers 50µs to 30s (a replicated store may wait for convergence).
    pub static CRYPTO_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0,
        ]
    });
}

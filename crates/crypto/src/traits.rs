//! Cipher trait for swappable authenticated encryption backends.

/// Output of one encryption: ciphertext (with authentication tag) and the
/// IV it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

/// An AEAD primitive failed. Carries no subject; callers add it.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct AeadFailure(pub String);

/// Authenticated encryption with associated data (AEAD).
///
/// Each implementation has a unique version tag (the first byte of wrapped
/// key blobs) and a transformation string recorded next to every ciphertext so
/// it can be opened without external state.
pub trait Cipher: Send + Sync {
    /// Unique identifier for this cipher in wrapped key blobs.
    fn version_tag(&self) -> u8;

    /// Transformation name stored in envelopes, e.g. `"AES/GCM/NoPadding"`.
    fn transformation(&self) -> &'static str;

    /// IV (nonce) length in bytes.
    fn iv_len(&self) -> usize;

    /// Encrypt `plaintext` under `key` with a fresh random IV.
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, AeadFailure>;

    /// Decrypt a ciphertext produced by [`encrypt`](Self::encrypt).
    fn decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
        iv: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, AeadFailure>;
}

//! Cipher engine: picks the AEAD for a key and binds key, IV and subject into
//! a ready-to-run transform.
//!
//! Everything needed to open a ciphertext later (transformation name and IV)
//! comes out of [`EncryptTransform::apply`]; nothing is kept on the side.

use {
    rand::RngCore,
    shredder_keystore::{KEY_LEN, KeyAlgorithm, KeyMaterial},
    zeroize::Zeroizing,
};

use crate::{
    Result,
    aes256gcm::{self, AesGcmCipher},
    error::CryptoError,
    traits::{Cipher, Sealed},
    xchacha20::{self, XChaCha20Poly1305Cipher},
};

/// The cipher used for keys of `algorithm`.
pub fn cipher_for(algorithm: KeyAlgorithm) -> &'static dyn Cipher {
    match algorithm {
        KeyAlgorithm::Aes256 => &AesGcmCipher,
        KeyAlgorithm::XChaCha20 => &XChaCha20Poly1305Cipher,
    }
}

/// The cipher recorded under `transformation`, if any.
///
/// Only AEAD transformations exist; names such as `AES/ECB/PKCS5Padding` are
/// unsupported by construction.
pub fn cipher_named(transformation: &str) -> Option<&'static dyn Cipher> {
    match transformation {
        aes256gcm::TRANSFORMATION => Some(&AesGcmCipher),
        xchacha20::TRANSFORMATION => Some(&XChaCha20Poly1305Cipher),
        _ => None,
    }
}

/// The symmetric key that actually encrypts a payload, bound to its subject.
///
/// In direct mode this is the subject's stored key; in envelope mode a fresh
/// key generated per payload.
#[derive(Clone)]
pub struct DataKey {
    subject: String,
    algorithm: KeyAlgorithm,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl DataKey {
    /// Fresh random key.
    pub fn generate(subject: impl Into<String>, algorithm: KeyAlgorithm) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut key[..]);
        Self {
            subject: subject.into(),
            algorithm,
            key,
        }
    }

    /// Use stored subject material directly.
    pub fn from_material(material: &KeyMaterial) -> Self {
        Self {
            subject: material.subject().to_string(),
            algorithm: material.algorithm(),
            key: Zeroizing::new(*material.key()),
        }
    }

    /// Serialized form for wrapping: `[algorithm tag][32 key bytes]`.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(1 + KEY_LEN));
        out.push(self.algorithm.tag());
        out.extend_from_slice(&self.key[..]);
        out
    }

    /// Parse [`to_bytes`](Self::to_bytes) output.
    pub fn from_bytes(subject: impl Into<String>, bytes: &[u8]) -> Option<Self> {
        let (&tag, key_bytes) = bytes.split_first()?;
        let algorithm = KeyAlgorithm::from_tag(tag)?;
        if key_bytes.len() != KEY_LEN {
            return None;
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(key_bytes);
        Some(Self {
            subject: subject.into(),
            algorithm,
            key,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("subject", &self.subject)
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Entry point for building transforms.
pub struct CipherEngine;

impl CipherEngine {
    /// Encrypting transform for `key`. The transformation follows from the
    /// key's algorithm.
    pub fn for_encryption(key: DataKey) -> EncryptTransform {
        EncryptTransform {
            cipher: cipher_for(key.algorithm),
            key,
        }
    }

    /// Decrypting transform for a ciphertext recorded with `transformation`
    /// and `iv`.
    pub fn for_decryption(key: DataKey, transformation: &str, iv: &[u8]) -> Result<DecryptTransform> {
        let cipher =
            cipher_named(transformation).ok_or_else(|| CryptoError::UnsupportedTransformation {
                transformation: transformation.to_string(),
            })?;

        let expected = cipher_for(key.algorithm).transformation();
        if expected != transformation {
            return Err(CryptoError::cipher(
                key.subject,
                format!("key is for {expected}, ciphertext was sealed with {transformation}"),
            ));
        }
        if iv.len() != cipher.iv_len() {
            return Err(CryptoError::cipher(
                key.subject,
                format!(
                    "initialization vector has {} bytes, {transformation} needs {}",
                    iv.len(),
                    cipher.iv_len()
                ),
            ));
        }

        Ok(DecryptTransform {
            cipher,
            key,
            iv: iv.to_vec(),
        })
    }
}

/// Seals payloads under one data key.
pub struct EncryptTransform {
    cipher: &'static dyn Cipher,
    key: DataKey,
}

impl EncryptTransform {
    pub fn transformation(&self) -> &'static str {
        self.cipher.transformation()
    }

    /// Encrypt with a fresh random IV.
    pub fn apply(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
        self.cipher
            .encrypt(&self.key.key, plaintext, aad)
            .map_err(|e| CryptoError::cipher(&self.key.subject, e.0))
    }
}

/// Opens one ciphertext.
pub struct DecryptTransform {
    cipher: &'static dyn Cipher,
    key: DataKey,
    iv: Vec<u8>,
}

impl DecryptTransform {
    pub fn transformation(&self) -> &'static str {
        self.cipher.transformation()
    }

    pub fn apply(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(&self.key.key, ciphertext, &self.iv, aad)
            .map_err(|e| CryptoError::cipher(&self.key.subject, e.0))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn round_trip(algorithm: KeyAlgorithm, plaintext: &[u8]) -> Vec<u8> {
        let key = DataKey::generate("alice", algorithm);
        let sealed = CipherEngine::for_encryption(key.clone())
            .apply(plaintext, b"alice")
            .unwrap();
        let transformation = cipher_for(algorithm).transformation();
        CipherEngine::for_decryption(key, transformation, &sealed.iv)
            .unwrap()
            .apply(&sealed.ciphertext, b"alice")
            .unwrap()
    }

    #[rstest]
    #[case::aes(KeyAlgorithm::Aes256)]
    #[case::xchacha(KeyAlgorithm::XChaCha20)]
    fn payload_sizes_round_trip(#[case] algorithm: KeyAlgorithm) {
        assert!(round_trip(algorithm, b"").is_empty());
        assert_eq!(round_trip(algorithm, b"jane@example.com"), b"jane@example.com");
        let large = vec![0x5a; 1024 * 1024 + 7];
        assert_eq!(round_trip(algorithm, &large), large);
    }

    #[test]
    fn transformation_follows_algorithm() {
        let aes = CipherEngine::for_encryption(DataKey::generate("a", KeyAlgorithm::Aes256));
        assert_eq!(aes.transformation(), "AES/GCM/NoPadding");
        let xchacha = CipherEngine::for_encryption(DataKey::generate("a", KeyAlgorithm::XChaCha20));
        assert_eq!(xchacha.transformation(), "XChaCha20-Poly1305");
    }

    #[test]
    fn unauthenticated_modes_unsupported() {
        let key = DataKey::generate("alice", KeyAlgorithm::Aes256);
        let err = CipherEngine::for_decryption(key, "AES/ECB/PKCS5Padding", &[0; 12])
            .err()
            .unwrap();
        assert!(matches!(err, CryptoError::UnsupportedTransformation { .. }));
    }

    #[test]
    fn wrong_iv_length_names_subject() {
        let key = DataKey::generate("alice", KeyAlgorithm::Aes256);
        let err = CipherEngine::for_decryption(key, "AES/GCM/NoPadding", &[0; 8])
            .err()
            .unwrap();
        match err {
            CryptoError::Cipher { subject, .. } => assert_eq!(subject, "alice"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn transformation_must_match_key() {
        let key = DataKey::generate("alice", KeyAlgorithm::XChaCha20);
        assert!(CipherEngine::for_decryption(key, "AES/GCM/NoPadding", &[0; 12]).is_err());
    }

    #[test]
    fn tampering_is_a_cipher_error() {
        let key = DataKey::generate("bob", KeyAlgorithm::XChaCha20);
        let mut sealed = CipherEngine::for_encryption(key.clone())
            .apply(b"payload", b"bob")
            .unwrap();
        sealed.ciphertext[0] ^= 1;
        let err = CipherEngine::for_decryption(key, "XChaCha20-Poly1305", &sealed.iv)
            .unwrap()
            .apply(&sealed.ciphertext, b"bob")
            .unwrap_err();
        assert!(matches!(err, CryptoError::Cipher { ref subject, .. } if subject == "bob"));
    }

    #[test]
    fn data_key_bytes_round_trip() {
        let key = DataKey::generate("carol", KeyAlgorithm::XChaCha20);
        let bytes = key.to_bytes();
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[0], KeyAlgorithm::XChaCha20.tag());

        let back = DataKey::from_bytes("carol", &bytes).unwrap();
        assert_eq!(back.algorithm(), KeyAlgorithm::XChaCha20);
        assert_eq!(*back.key, *key.key);

        assert!(DataKey::from_bytes("carol", &bytes[..10]).is_none());
        assert!(DataKey::from_bytes("carol", &[0x7f; 33]).is_none());
        assert!(DataKey::from_bytes("carol", &[]).is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let key = DataKey::generate("dave", KeyAlgorithm::Aes256);
        assert!(format!("{key:?}").contains("<redacted>"));
    }
}

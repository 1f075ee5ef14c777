//! AES-256-GCM implementation of the [`Cipher`] trait.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::traits::{AeadFailure, Cipher, Sealed};

/// Version tag for the AES-256-GCM cipher.
pub const VERSION_TAG: u8 = 0x01;

pub const TRANSFORMATION: &str = "AES/GCM/NoPadding";

/// 96-bit GCM nonce.
const NONCE_LEN: usize = 12;

/// GCM tag size.
const TAG_LEN: usize = 16;

/// AES-256-GCM AEAD cipher.
pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    fn version_tag(&self) -> u8 {
        VERSION_TAG
    }

    fn transformation(&self) -> &'static str {
        TRANSFORMATION
    }

    fn iv_len(&self) -> usize {
        NONCE_LEN
    }

    #[allow(deprecated)]
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Sealed, AeadFailure> {
        let cipher = Aes256Gcm::new(key.into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload {
                msg: plaintext,
                aad,
            })
            .map_err(|e| AeadFailure(e.to_string()))?;

        Ok(Sealed {
            ciphertext,
            iv: nonce_bytes.to_vec(),
        })
    }

    #[allow(deprecated)]
    fn decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
        iv: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, AeadFailure> {
        if iv.len() != NONCE_LEN {
            return Err(AeadFailure(format!(
                "IV has {} bytes, expected {NONCE_LEN}",
                iv.len()
            )));
        }
        if ciphertext.len() < TAG_LEN {
            return Err(AeadFailure("ciphertext too short".to_string()));
        }

        let cipher = Aes256Gcm::new(key.into());
        cipher
            .decrypt(Nonce::from_slice(iv), Payload {
                msg: ciphertext,
                aad,
            })
            .map_err(|e| AeadFailure(e.to_string()))
    }
}

//! XChaCha20-Poly1305 implementation of the [`Cipher`] trait.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

use crate::traits::{AeadFailure, Cipher, Sealed};

/// Version tag for the XChaCha20-Poly1305 cipher.
pub const VERSION_TAG: u8 = 0x02;

pub const TRANSFORMATION: &str = "XChaCha20-Poly1305";

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
const NONCE_LEN: usize = 24;

/// Poly1305 tag size.
const TAG_LEN: usize = 16;

/// XChaCha20-Poly1305 AEAD cipher.
///
/// The 24-byte nonce is random per call; collisions are negligible even for
/// one long-lived subject key.
pub struct XChaCha20Poly1305Cipher;

impl Cipher for XChaCha20Poly1305Cipher {
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
        let cipher = XChaCha20Poly1305::new(key.into());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

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
                "nonce has {} bytes, expected {NONCE_LEN}",
                iv.len()
            )));
        }
        if ciphertext.len() < TAG_LEN {
            return Err(AeadFailure("ciphertext too short".to_string()));
        }

        let nonce = XNonce::from_slice(iv);
        let cipher = XChaCha20Poly1305::new(key.into());

        cipher
            .decrypt(nonce, Payload {
                msg: ciphertext,
                aad,
            })
            .map_err(|e| AeadFailure(e.to_string()))
    }
}

//! Data key wrapping / unwrapping using the [`Cipher`] trait.
//!
//! A data key is encrypted with the subject's KEK using the same AEAD family
//! as payload encryption. The AAD is `"dek-wrap|" + encryption context`, which
//! domain-separates wrapping from payload encryption and binds every wrapped
//! key to the context it was issued for.
//!
//! Blob layout: `[cipher version tag: 1][iv: iv_len][ciphertext + tag]`.

use zeroize::Zeroizing;

use crate::traits::{AeadFailure, Cipher};

/// Domain-separation prefix for key wrapping AAD.
const WRAP_AAD_PREFIX: &[u8] = b"dek-wrap|";

fn wrap_aad(context: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(WRAP_AAD_PREFIX.len() + context.len());
    aad.extend_from_slice(WRAP_AAD_PREFIX);
    aad.extend_from_slice(context.as_bytes());
    aad
}

/// Wrap (encrypt) serialized key bytes with a KEK.
pub fn wrap_key(
    cipher: &dyn Cipher,
    kek: &[u8; 32],
    key_bytes: &[u8],
    context: &str,
) -> Result<Vec<u8>, AeadFailure> {
    let sealed = cipher.encrypt(kek, key_bytes, &wrap_aad(context))?;

    let mut blob = Vec::with_capacity(1 + sealed.iv.len() + sealed.ciphertext.len());
    blob.push(cipher.version_tag());
    blob.extend_from_slice(&sealed.iv);
    blob.extend_from_slice(&sealed.ciphertext);
    Ok(blob)
}

/// Unwrap (decrypt) a blob produced by [`wrap_key`].
///
/// Validates that the version tag matches `cipher`.
pub fn unwrap_key(
    cipher: &dyn Cipher,
    kek: &[u8; 32],
    blob: &[u8],
    context: &str,
) -> Result<Zeroizing<Vec<u8>>, AeadFailure> {
    let Some((&version, rest)) = blob.split_first() else {
        return Err(AeadFailure("empty wrapped key".to_string()));
    };

    if version != cipher.version_tag() {
        return Err(AeadFailure(format!(
            "unsupported cipher version: {version:#04x}, expected {:#04x}",
            cipher.version_tag()
        )));
    }

    if rest.len() < cipher.iv_len() {
        return Err(AeadFailure("wrapped key truncated".to_string()));
    }
    let (iv, ciphertext) = rest.split_at(cipher.iv_len());

    cipher
        .decrypt(kek, ciphertext, iv, &wrap_aad(context))
        .map(Zeroizing::new)
}

//! Symmetric key material bound to a subject.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    rand::RngCore,
    serde::{Deserialize, Serialize},
    uuid::Uuid,
    zeroize::Zeroizing,
};

/// Length of every symmetric key in bytes (256-bit).
pub const KEY_LEN: usize = 32;

/// Symmetric algorithm the key is meant for.
///
/// Both map to an AEAD transformation; there is no unauthenticated choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    /// AES-256 (used with GCM).
    #[default]
    Aes256,
    /// XChaCha20 (used with Poly1305).
    XChaCha20,
}

impl KeyAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aes256 => "aes256",
            Self::XChaCha20 => "xchacha20",
        }
    }

    /// Single-byte tag used in serialized data keys.
    pub fn tag(self) -> u8 {
        match self {
            Self::Aes256 => 0x01,
            Self::XChaCha20 => 0x02,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Aes256),
            0x02 => Some(Self::XChaCha20),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes256" => Ok(Self::Aes256),
            "xchacha20" => Ok(Self::XChaCha20),
            other => Err(format!("unknown key algorithm: {other}")),
        }
    }
}

/// One subject's symmetric key.
///
/// Key bytes are zeroized on drop and never printed by `Debug`.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyMaterial {
    id: Uuid,
    subject: String,
    algorithm: KeyAlgorithm,
    #[serde(with = "key_b64")]
    key: Zeroizing<[u8; KEY_LEN]>,
    created_at_ms: u64,
}

impl KeyMaterial {
    /// Generate fresh random material for `subject`.
    pub fn generate(subject: impl Into<String>, algorithm: KeyAlgorithm) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut key[..]);
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            algorithm,
            key,
            created_at_ms: now_ms(),
        }
    }

    /// Rebuild material from persisted parts.
    pub fn from_parts(
        id: Uuid,
        subject: impl Into<String>,
        algorithm: KeyAlgorithm,
        key: Zeroizing<[u8; KEY_LEN]>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            algorithm,
            key,
            created_at_ms,
        }
    }

    /// Rebuild material from a byte slice, checking the key length.
    pub fn from_slice(
        id: Uuid,
        subject: impl Into<String>,
        algorithm: KeyAlgorithm,
        bytes: &[u8],
        created_at_ms: u64,
    ) -> Option<Self> {
        if bytes.len() != KEY_LEN {
            return None;
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Some(Self::from_parts(id, subject, algorithm, key, created_at_ms))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .field("created_at_ms", &self.created_at_ms)
            .finish()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod key_b64 {
    use {
        base64::Engine,
        serde::{Deserialize, Deserializer, Serializer, de::Error},
        zeroize::Zeroizing,
    };

    use super::KEY_LEN;

    pub fn serialize<S: Serializer>(
        key: &Zeroizing<[u8; KEY_LEN]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded = Zeroizing::new(base64::engine::general_purpose::STANDARD.encode(&key[..]));
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        let bytes = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(D::Error::custom)?,
        );
        if bytes.len() != KEY_LEN {
            return Err(D::Error::custom(format!(
                "key has wrong length: {} (expected {KEY_LEN})",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_is_random() {
        let a = KeyMaterial::generate("s1", KeyAlgorithm::Aes256);
        let b = KeyMaterial::generate("s1", KeyAlgorithm::Aes256);
        assert_ne!(a.key(), b.key());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.subject(), "s1");
    }

    #[test]
    fn debug_redacts_key() {
        let material = KeyMaterial::generate("s1", KeyAlgorithm::XChaCha20);
        let printed = format!("{material:?}");
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("xchacha20") || printed.contains("XChaCha20"));
    }

    #[test]
    fn serde_keeps_key_bytes() {
        let material = KeyMaterial::generate("s1", KeyAlgorithm::XChaCha20);
        let json = serde_json::to_string(&material).unwrap();
        let parsed: KeyMaterial = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.key(), material.key());
        assert_eq!(parsed.id(), material.id());
        assert_eq!(parsed.algorithm(), KeyAlgorithm::XChaCha20);
    }

    #[test]
    fn from_slice_checks_length() {
        let id = Uuid::new_v4();
        assert!(KeyMaterial::from_slice(id, "s", KeyAlgorithm::Aes256, &[0u8; 31], 0).is_none());
        assert!(KeyMaterial::from_slice(id, "s", KeyAlgorithm::Aes256, &[0u8; 32], 0).is_some());
    }

    #[test]
    fn algorithm_tags_round_trip() {
        for alg in [KeyAlgorithm::Aes256, KeyAlgorithm::XChaCha20] {
            assert_eq!(KeyAlgorithm::from_tag(alg.tag()), Some(alg));
            assert_eq!(alg.as_str().parse::<KeyAlgorithm>().unwrap(), alg);
        }
        assert_eq!(KeyAlgorithm::from_tag(0x7f), None);
    }
}

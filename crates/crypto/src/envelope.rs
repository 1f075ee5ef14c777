//! Self-describing ciphertext container.
//!
//! An [`EncryptedEnvelope`] carries everything needed to decrypt it later
//! except the key itself: the subject it belongs to, the transformation and
//! IV, and in envelope mode the wrapped data key plus its encryption context.

use serde::{Deserialize, Serialize};

/// Identity of the field a ciphertext was taken from: its number or, for
/// schemas without numbers, its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldTag {
    Number(u32),
    Name(String),
}

impl std::fmt::Display for FieldTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// How the data key was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeMetadata {
    /// The subject's key encrypted the payload directly.
    Direct {
        transformation: String,
        initialization_vector: Vec<u8>,
    },
    /// A per-payload data key, wrapped by the subject's key-encryption key.
    Wrapped {
        transformation: String,
        initialization_vector: Vec<u8>,
        wrapped_data_key: Vec<u8>,
        encryption_context: String,
    },
}

impl EnvelopeMetadata {
    pub fn transformation(&self) -> &str {
        match self {
            Self::Direct { transformation, .. } | Self::Wrapped { transformation, .. } => {
                transformation
            },
        }
    }

    pub fn initialization_vector(&self) -> &[u8] {
        match self {
            Self::Direct {
                initialization_vector,
                ..
            }
            | Self::Wrapped {
                initialization_vector,
                ..
            } => initialization_vector,
        }
    }
}

/// Encrypted payload plus the metadata to open it.
///
/// Immutable: fields are private and [`with_original_field`](Self::with_original_field)
/// returns a new envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EnvelopeWire", into = "EnvelopeWire")]
pub struct EncryptedEnvelope {
    subject_id: String,
    data: Vec<u8>,
    original_field: Option<FieldTag>,
    metadata: EnvelopeMetadata,
}

impl EncryptedEnvelope {
    pub fn new(subject_id: impl Into<String>, data: Vec<u8>, metadata: EnvelopeMetadata) -> Self {
        Self {
            subject_id: subject_id.into(),
            data,
            original_field: None,
            metadata,
        }
    }

    /// Same envelope, recording which field the plaintext came from.
    #[must_use]
    pub fn with_original_field(self, tag: FieldTag) -> Self {
        Self {
            original_field: Some(tag),
            ..self
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn original_field(&self) -> Option<&FieldTag> {
        self.original_field.as_ref()
    }

    pub fn metadata(&self) -> &EnvelopeMetadata {
        &self.metadata
    }

    pub fn transformation(&self) -> &str {
        self.metadata.transformation()
    }

    pub fn initialization_vector(&self) -> &[u8] {
        self.metadata.initialization_vector()
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse JSON bytes produced by [`to_json`](Self::to_json).
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Flat serialized form. Byte fields are base64.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeWire {
    subject_id: String,
    #[serde(with = "b64")]
    data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_field_tag: Option<FieldTag>,
    used_transformation: String,
    #[serde(with = "b64")]
    initialization_vector: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    wrapped_data_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption_context: Option<String>,
}

impl From<EncryptedEnvelope> for EnvelopeWire {
    fn from(envelope: EncryptedEnvelope) -> Self {
        let (used_transformation, initialization_vector, wrapped_data_key, encryption_context) =
            match envelope.metadata {
                EnvelopeMetadata::Direct {
                    transformation,
                    initialization_vector,
                } => (transformation, initialization_vector, None, None),
                EnvelopeMetadata::Wrapped {
                    transformation,
                    initialization_vector,
                    wrapped_data_key,
                    encryption_context,
                } => (
                    transformation,
                    initialization_vector,
                    Some(wrapped_data_key),
                    Some(encryption_context),
                ),
            };
        Self {
            subject_id: envelope.subject_id,
            data: envelope.data,
            original_field_tag: envelope.original_field,
            used_transformation,
            initialization_vector,
            wrapped_data_key,
            encryption_context,
        }
    }
}

impl TryFrom<EnvelopeWire> for EncryptedEnvelope {
    type Error = String;

    fn try_from(wire: EnvelopeWire) -> Result<Self, Self::Error> {
        let metadata = match (wire.wrapped_data_key, wire.encryption_context) {
            (None, None) => EnvelopeMetadata::Direct {
                transformation: wire.used_transformation,
                initialization_vector: wire.initialization_vector,
            },
            (Some(wrapped_data_key), Some(encryption_context)) => EnvelopeMetadata::Wrapped {
                transformation: wire.used_transformation,
                initialization_vector: wire.initialization_vector,
                wrapped_data_key,
                encryption_context,
            },
            (Some(_), None) => return Err("wrappedDataKey without encryptionContext".into()),
            (None, Some(_)) => return Err("encryptionContext without wrappedDataKey".into()),
        };
        Ok(Self {
            subject_id: wire.subject_id,
            data: wire.data,
            original_field: wire.original_field_tag,
            metadata,
        })
    }
}

mod b64 {
    use {
        base64::Engine,
        serde::{Deserialize, Deserializer, Serializer, de::Error},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)
    }
}

mod b64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => super::b64::serialize(b, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::b64")] Vec<u8>);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(b)| b))
    }
}

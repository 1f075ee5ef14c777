//! One personal-data container and the swap between its plaintext
//! alternatives and its encrypted alternative.
//!
//! Each swap runs in three steps: `prepare_*` reads what it needs from the
//! message, the async crypto step owns its inputs, and `apply_*` writes the
//! result back. Many containers of one message can therefore run their
//! crypto concurrently and still be written back one after the other.

use {
    shredder_crypto::{Decryptor, EncryptedEnvelope, Encryptor, FieldTag},
    tracing::debug,
};

use crate::{
    codec,
    error::{PersonalDataError, Result, SchemaError},
    message::{RecordMessage, Value},
    schema::{FieldKind, OneofDescriptor, RecordSchema},
    subject::{SubjectIdentifierFieldDefinition, SubjectIdentifierFinder},
};

#[derive(Debug, Clone)]
struct Alternative {
    number: u32,
    name: String,
    kind: FieldKind,
}

/// Plaintext read from a message, ready to encrypt.
#[derive(Debug)]
pub struct PendingEncryption {
    subject: String,
    tag: FieldTag,
    plaintext: Vec<u8>,
}

impl PendingEncryption {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn tag(&self) -> &FieldTag {
        &self.tag
    }
}

/// Envelope read from a message, ready to decrypt.
#[derive(Debug)]
pub struct PendingDecryption {
    subject: String,
    restore_into: u32,
    envelope: EncryptedEnvelope,
}

impl PendingDecryption {
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Encrypted result waiting to be written back.
#[derive(Debug)]
pub struct SealedField(EncryptedEnvelope);

/// Decrypted bytes waiting to be written back.
#[derive(Debug)]
pub struct OpenedField {
    number: u32,
    plaintext: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PersonalDataFieldDefinition {
    path: String,
    message_path: Vec<u32>,
    oneof: String,
    target: u32,
    alternatives: Vec<Alternative>,
    subject: SubjectIdentifierFieldDefinition,
}

impl PersonalDataFieldDefinition {
    /// Bind `container`, declared in `parent`, to its encrypted alternative
    /// and its subject identifier. `message_path` is the chain of nested
    /// message field numbers leading from the root record to `parent`.
    pub fn new(
        parent: &RecordSchema,
        container: &OneofDescriptor,
        message_path: Vec<u32>,
        parent_path: &str,
        finder: &dyn SubjectIdentifierFinder,
    ) -> std::result::Result<Self, SchemaError> {
        let path = format!("{parent_path}.{}", container.name());

        let (targets, alternatives): (Vec<_>, Vec<_>) = parent
            .oneof_fields(container.name())
            .partition(|f| matches!(f.kind(), FieldKind::EncryptedPersonalData));
        let target = match targets.as_slice() {
            [] => return Err(SchemaError::EncryptionTargetFieldNotFound { path }),
            [target] => target.number(),
            many => {
                return Err(SchemaError::TooManyEncryptionTargetFields {
                    path,
                    count: many.len(),
                });
            },
        };

        let subject = finder.find(parent, container, &path)?;

        Ok(Self {
            message_path,
            oneof: container.name().to_string(),
            target,
            alternatives: alternatives
                .into_iter()
                .map(|f| Alternative {
                    number: f.number(),
                    name: f.name().to_string(),
                    kind: f.kind().clone(),
                })
                .collect(),
            subject,
            path,
        })
    }

    /// Dotted path of the container, e.g. `Person.contact_info`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn subject_field(&self) -> &SubjectIdentifierFieldDefinition {
        &self.subject
    }

    fn parent_of<'m>(&self, root: &'m RecordMessage) -> Option<&'m RecordMessage> {
        self.message_path
            .iter()
            .try_fold(root, |message, number| match message.get_by_number(*number) {
                Some(Value::Message(nested)) => Some(nested),
                _ => None,
            })
    }

    fn parent_of_mut<'m>(&self, root: &'m mut RecordMessage) -> Option<&'m mut RecordMessage> {
        let mut message = root;
        for number in &self.message_path {
            match message.get_mut_by_number(*number) {
                Some(Value::Message(nested)) => message = nested,
                _ => return None,
            }
        }
        Some(message)
    }

    fn resolve_tag(&self, tag: &FieldTag) -> Option<&Alternative> {
        self.alternatives.iter().find(|alt| match tag {
            FieldTag::Number(n) => alt.number == *n,
            FieldTag::Name(name) => alt.name == *name,
        })
    }

    fn alternative(&self, number: u32) -> Option<&Alternative> {
        self.alternatives.iter().find(|alt| alt.number == number)
    }

    fn invalid(&self, reason: impl Into<String>) -> PersonalDataError {
        PersonalDataError::InvalidEncryptedMessage {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    /// Serialized bytes of the plaintext alternative currently set, with its
    /// identity. `None` when the container is unset or already encrypted.
    pub fn value_from(&self, root: &RecordMessage) -> Result<Option<(FieldTag, Vec<u8>)>> {
        let Some(parent) = self.parent_of(root) else {
            return Ok(None);
        };
        let Some(set) = parent.which_one_of(&self.oneof) else {
            return Ok(None);
        };
        if set.number() == self.target {
            return Ok(None);
        }
        let Some(value) = parent.get_by_number(set.number()) else {
            return Ok(None);
        };
        let bytes = codec::encode(value).map_err(|e| PersonalDataError::Encode {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some((FieldTag::Number(set.number()), bytes)))
    }

    pub fn prepare_encryption(&self, root: &RecordMessage) -> Result<Option<PendingEncryption>> {
        let Some((tag, plaintext)) = self.value_from(root)? else {
            debug!(field = %self.path, "no plaintext personal data, skipping");
            return Ok(None);
        };
        let Some(parent) = self.parent_of(root) else {
            return Ok(None);
        };
        let subject = self.subject.subject_from(parent)?;
        Ok(Some(PendingEncryption {
            subject,
            tag,
            plaintext,
        }))
    }

    pub async fn encrypt(
        &self,
        encryptor: &dyn Encryptor,
        pending: PendingEncryption,
    ) -> Result<SealedField> {
        let envelope = encryptor
            .encrypt(&pending.subject, pending.plaintext)
            .await
            .map_err(|source| PersonalDataError::Crypto {
                field: self.path.clone(),
                source,
            })?;
        Ok(SealedField(envelope.with_original_field(pending.tag)))
    }

    /// Replace the plaintext alternative with the envelope.
    pub fn apply_encrypted(&self, root: &mut RecordMessage, sealed: SealedField) -> Result<()> {
        let parent = self
            .parent_of_mut(root)
            .ok_or_else(|| self.invalid("container disappeared before write-back"))?;
        parent.set_by_number(self.target, Value::Encrypted(sealed.0))?;
        debug!(field = %self.path, "personal data encrypted");
        Ok(())
    }

    /// Encrypt the container in place. An unset container is left alone and
    /// the encryptor is not called.
    pub async fn swap_to_encrypted(
        &self,
        encryptor: &dyn Encryptor,
        root: &mut RecordMessage,
    ) -> Result<()> {
        let Some(pending) = self.prepare_encryption(root)? else {
            return Ok(());
        };
        let sealed = self.encrypt(encryptor, pending).await?;
        self.apply_encrypted(root, sealed)
    }

    pub fn prepare_decryption(&self, root: &RecordMessage) -> Result<Option<PendingDecryption>> {
        let Some(parent) = self.parent_of(root) else {
            return Ok(None);
        };
        let Some(set) = parent.which_one_of(&self.oneof) else {
            debug!(field = %self.path, "personal data unset, skipping");
            return Ok(None);
        };
        if set.number() != self.target {
            debug!(field = %self.path, alternative = set.name(), "personal data not encrypted, skipping");
            return Ok(None);
        }

        let envelope = match parent.get_by_number(self.target) {
            Some(Value::Encrypted(envelope)) => envelope.clone(),
            Some(other) => {
                return Err(PersonalDataError::UnexpectedValueShape {
                    path: self.path.clone(),
                    found: other.kind_name(),
                });
            },
            None => return Ok(None),
        };

        let tag = envelope
            .original_field()
            .ok_or_else(|| self.invalid("envelope carries no original field tag"))?;
        let restore_into = self
            .resolve_tag(tag)
            .ok_or_else(|| self.invalid(format!("original field {tag} is not an alternative")))?
            .number;

        let subject = self.subject.subject_from(parent)?;
        Ok(Some(PendingDecryption {
            subject,
            restore_into,
            envelope,
        }))
    }

    pub async fn decrypt(
        &self,
        decryptor: &dyn Decryptor,
        pending: PendingDecryption,
    ) -> Result<OpenedField> {
        let plaintext = decryptor
            .decrypt(&pending.subject, &pending.envelope)
            .await
            .map_err(|source| PersonalDataError::Crypto {
                field: self.path.clone(),
                source,
            })?;
        Ok(OpenedField {
            number: pending.restore_into,
            plaintext,
        })
    }

    /// Replace the envelope with the restored plaintext alternative.
    pub fn apply_decrypted(&self, root: &mut RecordMessage, opened: OpenedField) -> Result<()> {
        let alternative = self
            .alternative(opened.number)
            .ok_or_else(|| self.invalid(format!("field #{} is not an alternative", opened.number)))?;
        let value = codec::decode(&alternative.kind, &opened.plaintext)
            .map_err(|e| self.invalid(format!("{}: {e}", alternative.name)))?;

        let parent = self
            .parent_of_mut(root)
            .ok_or_else(|| self.invalid("container disappeared before write-back"))?;
        parent
            .set_by_number(alternative.number, value)
            .map_err(|e| self.invalid(e.to_string()))?;
        debug!(field = %self.path, alternative = %alternative.name, "personal data decrypted");
        Ok(())
    }

    /// Decrypt the container in place. Unset or plaintext containers are
    /// left alone.
    pub async fn swap_to_decrypted(
        &self,
        decryptor: &dyn Decryptor,
        root: &mut RecordMessage,
    ) -> Result<()> {
        let Some(pending) = self.prepare_decryption(root)? else {
            return Ok(());
        };
        let opened = self.decrypt(decryptor, pending).await?;
        self.apply_decrypted(root, opened)
    }
}

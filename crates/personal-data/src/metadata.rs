//! Per-schema personal-data metadata and message-level encryption.

use std::sync::Arc;

use {
    dashmap::DashMap,
    futures::future::try_join_all,
    shredder_config::MarkersConfig,
    shredder_crypto::{Decryptor, Encryptor},
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use shredder_metrics::{counter, labels, metadata as metadata_metrics};

use crate::{
    error::{Result, SchemaError},
    field::PersonalDataFieldDefinition,
    message::RecordMessage,
    schema::{FieldKind, RecordSchema, SchemaFingerprint},
    subject::{SiblingFlagFinder, SubjectIdentifierFinder},
};

/// Every personal-data container of one schema shape, nested ones included.
#[derive(Debug)]
pub struct PersonalMetadata {
    schema_name: String,
    fingerprint: SchemaFingerprint,
    fields: Vec<PersonalDataFieldDefinition>,
}

impl PersonalMetadata {
    pub fn requires_encryption(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn fields(&self) -> &[PersonalDataFieldDefinition] {
        &self.fields
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    fn check_schema(&self, message: &RecordMessage) -> std::result::Result<(), SchemaError> {
        if message.schema().fingerprint() != self.fingerprint {
            return Err(SchemaError::SchemaMismatch {
                expected: self.schema_name.clone(),
                found: message.schema().name().to_string(),
            });
        }
        Ok(())
    }

    /// Encrypt every set personal-data container of `message`.
    ///
    /// All containers are encrypted concurrently and written back only once
    /// every one of them succeeded; on error `message` is unchanged.
    pub async fn encrypt_personal_data(
        &self,
        encryptor: &dyn Encryptor,
        message: &mut RecordMessage,
    ) -> Result<()> {
        self.check_schema(message)?;

        let mut pending = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if let Some(p) = field.prepare_encryption(message)? {
                pending.push((field, p));
            }
        }

        #[cfg(feature = "metrics")]
        counter!(metadata_metrics::FIELDS_SKIPPED_TOTAL, labels::SCHEMA => self.schema_name.clone())
            .increment((self.fields.len() - pending.len()) as u64);

        if pending.is_empty() {
            return Ok(());
        }

        let sealed = try_join_all(
            pending
                .into_iter()
                .map(|(field, p)| async move { field.encrypt(encryptor, p).await.map(|r| (field, r)) }),
        )
        .await?;

        let mut staged = message.clone();
        let count = sealed.len();
        for (field, result) in sealed {
            field.apply_encrypted(&mut staged, result)?;
        }
        *message = staged;

        #[cfg(feature = "metrics")]
        counter!(metadata_metrics::FIELDS_ENCRYPTED_TOTAL, labels::SCHEMA => self.schema_name.clone())
            .increment(count as u64);

        debug!(schema = %self.schema_name, fields = count, "personal data encrypted");
        Ok(())
    }

    /// Decrypt every encrypted personal-data container of `message`, with the
    /// same all-or-nothing write-back as encryption.
    pub async fn decrypt_personal_data(
        &self,
        decryptor: &dyn Decryptor,
        message: &mut RecordMessage,
    ) -> Result<()> {
        self.check_schema(message)?;

        let mut pending = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            if let Some(p) = field.prepare_decryption(message)? {
                pending.push((field, p));
            }
        }

        #[cfg(feature = "metrics")]
        counter!(metadata_metrics::FIELDS_SKIPPED_TOTAL, labels::SCHEMA => self.schema_name.clone())
            .increment((self.fields.len() - pending.len()) as u64);

        if pending.is_empty() {
            return Ok(());
        }

        let opened = try_join_all(
            pending
                .into_iter()
                .map(|(field, p)| async move { field.decrypt(decryptor, p).await.map(|r| (field, r)) }),
        )
        .await?;

        let mut staged = message.clone();
        let count = opened.len();
        for (field, result) in opened {
            field.apply_decrypted(&mut staged, result)?;
        }
        *message = staged;

        #[cfg(feature = "metrics")]
        counter!(metadata_metrics::FIELDS_DECRYPTED_TOTAL, labels::SCHEMA => self.schema_name.clone())
            .increment(count as u64);

        debug!(schema = %self.schema_name, fields = count, "personal data decrypted");
        Ok(())
    }
}

/// Builds and caches [`PersonalMetadata`] per schema shape.
pub struct PersonalMetadataProvider {
    personal_data_marker: String,
    finder: Arc<dyn SubjectIdentifierFinder>,
    cache: DashMap<SchemaFingerprint, Arc<PersonalMetadata>>,
}

impl PersonalMetadataProvider {
    /// Sibling-flag subject lookup with the configured marker names.
    pub fn new(markers: &MarkersConfig) -> Self {
        Self::with_finder(
            markers.personal_data.clone(),
            Arc::new(SiblingFlagFinder::new(markers.subject_identifier.clone())),
        )
    }

    pub fn with_finder(
        personal_data_marker: impl Into<String>,
        finder: Arc<dyn SubjectIdentifierFinder>,
    ) -> Self {
        Self {
            personal_data_marker: personal_data_marker.into(),
            finder,
            cache: DashMap::new(),
        }
    }

    /// Metadata for `schema`, analyzed on first sight. Schema errors are not
    /// cached; every call for a broken schema reports them again.
    pub fn for_schema(
        &self,
        schema: &Arc<RecordSchema>,
    ) -> std::result::Result<Arc<PersonalMetadata>, SchemaError> {
        let fingerprint = schema.fingerprint();
        if let Some(hit) = self.cache.get(&fingerprint) {
            #[cfg(feature = "metrics")]
            counter!(metadata_metrics::CACHE_HITS_TOTAL, labels::SCHEMA => schema.name().to_string())
                .increment(1);
            return Ok(Arc::clone(hit.value()));
        }

        let mut fields = Vec::new();
        self.collect(schema, &mut Vec::new(), schema.name(), &mut fields)?;
        let metadata = Arc::new(PersonalMetadata {
            schema_name: schema.name().to_string(),
            fingerprint,
            fields,
        });

        #[cfg(feature = "metrics")]
        counter!(metadata_metrics::SCHEMAS_ANALYZED_TOTAL, labels::SCHEMA => schema.name().to_string())
            .increment(1);
        info!(
            schema = schema.name(),
            %fingerprint,
            containers = metadata.fields.len(),
            "personal data metadata built"
        );

        Ok(Arc::clone(
            self.cache.entry(fingerprint).or_insert(metadata).value(),
        ))
    }

    /// Walk `schema`, recursing into nested message fields that are not
    /// themselves personal-data alternatives.
    fn collect(
        &self,
        schema: &RecordSchema,
        message_path: &mut Vec<u32>,
        path: &str,
        out: &mut Vec<PersonalDataFieldDefinition>,
    ) -> std::result::Result<(), SchemaError> {
        let personal: Vec<_> = schema
            .oneofs()
            .iter()
            .filter(|o| o.has_marker(&self.personal_data_marker))
            .collect();

        for container in &personal {
            out.push(PersonalDataFieldDefinition::new(
                schema,
                container,
                message_path.clone(),
                path,
                self.finder.as_ref(),
            )?);
        }

        for field in schema.fields() {
            let FieldKind::Message(nested) = field.kind() else {
                continue;
            };
            if field
                .oneof()
                .is_some_and(|o| personal.iter().any(|p| p.name() == o))
            {
                continue;
            }
            message_path.push(field.number());
            self.collect(nested, message_path, &format!("{path}.{}", field.name()), out)?;
            message_path.pop();
        }
        Ok(())
    }

    /// Resolve metadata for the message's schema, then encrypt it.
    pub async fn encrypt_personal_data(
        &self,
        encryptor: &dyn Encryptor,
        message: &mut RecordMessage,
    ) -> Result<()> {
        let metadata = self.for_schema(message.schema())?;
        metadata.encrypt_personal_data(encryptor, message).await
    }

    /// Resolve metadata for the message's schema, then decrypt it.
    pub async fn decrypt_personal_data(
        &self,
        decryptor: &dyn Decryptor,
        message: &mut RecordMessage,
    ) -> Result<()> {
        let metadata = self.for_schema(message.schema())?;
        metadata.decrypt_personal_data(decryptor, message).await
    }

    pub fn cached_schemas(&self) -> usize {
        self.cache.len()
    }
}

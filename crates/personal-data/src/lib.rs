//! Personal-data discovery and in-place encryption for structured records.
//!
//! A schema marks personal data by grouping it in a oneof that carries the
//! `personal_data` marker. Each such container holds plaintext alternatives
//! and exactly one encrypted alternative; a sibling field marked
//! `subject_identifier` names the data owner. [`PersonalMetadataProvider`]
//! analyzes a schema once and caches the result, then swaps every container
//! of a message between its plaintext and encrypted form through a
//! [`shredder_crypto::Encryptor`] / [`shredder_crypto::Decryptor`].

pub mod codec;
pub mod error;
pub mod field;
pub mod message;
pub mod metadata;
pub mod schema;
pub mod subject;

pub use {
    error::{PersonalDataError, Result, SchemaError},
    field::{OpenedField, PendingDecryption, PendingEncryption, PersonalDataFieldDefinition, SealedField},
    message::{RecordMessage, Value},
    metadata::{PersonalMetadata, PersonalMetadataProvider},
    schema::{
        FieldDescriptor, FieldKind, OneofDescriptor, RecordSchema, RecordSchemaBuilder,
        SchemaFingerprint,
    },
    subject::{SiblingFlagFinder, SubjectIdentifierFieldDefinition, SubjectIdentifierFinder},
};

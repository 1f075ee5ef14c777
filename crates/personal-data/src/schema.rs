//! Record schema capability: fields, oneof groups and their markers.
//!
//! Schemas are immutable once built and shared as `Arc<RecordSchema>`. Each
//! carries a content fingerprint (SHA-256 over its canonical shape, nested
//! message schemas included) so analysis results can be cached per shape
//! rather than per instance.

use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use sha2::{Digest, Sha256};

use crate::error::SchemaError;

/// Stable identity of a schema shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaFingerprint([u8; 32]);

impl SchemaFingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Int64,
    Bool,
    Bytes,
    Message(Arc<RecordSchema>),
    /// Holds an encrypted envelope in place of a personal-data alternative.
    EncryptedPersonalData,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
            Self::Message(_) => "message",
            Self::EncryptedPersonalData => "encrypted personal data",
        }
    }

    fn fingerprint_into(&self, hasher: &mut Sha256) {
        hasher.update(self.name().as_bytes());
        if let Self::Message(schema) = self {
            hasher.update(schema.fingerprint().as_bytes());
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    number: u32,
    name: String,
    kind: FieldKind,
    markers: BTreeSet<String>,
    oneof: Option<String>,
}

impl FieldDescriptor {
    pub fn new(number: u32, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            number,
            name: name.into(),
            kind,
            markers: BTreeSet::new(),
            oneof: None,
        }
    }

    #[must_use]
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.insert(marker.into());
        self
    }

    /// Make the field an alternative of the named oneof group.
    #[must_use]
    pub fn in_oneof(mut self, oneof: impl Into<String>) -> Self {
        self.oneof = Some(oneof.into());
        self
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn oneof(&self) -> Option<&str> {
        self.oneof.as_deref()
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.contains(marker)
    }
}

/// A group of alternatives of which at most one is set.
#[derive(Debug, Clone)]
pub struct OneofDescriptor {
    name: String,
    markers: BTreeSet<String>,
}

impl OneofDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.markers.contains(marker)
    }
}

#[derive(Debug)]
pub struct RecordSchema {
    name: String,
    fields: Vec<FieldDescriptor>,
    oneofs: Vec<OneofDescriptor>,
    fingerprint: SchemaFingerprint,
}

impl RecordSchema {
    pub fn builder(name: impl Into<String>) -> RecordSchemaBuilder {
        RecordSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            oneofs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn oneofs(&self) -> &[OneofDescriptor] {
        &self.oneofs
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn oneof(&self, name: &str) -> Option<&OneofDescriptor> {
        self.oneofs.iter().find(|o| o.name == name)
    }

    /// Alternatives of the named oneof, in declaration order.
    pub fn oneof_fields<'a, 'b>(&'a self, oneof: &'b str) -> impl Iterator<Item = &'a FieldDescriptor> + use<'a, 'b> {
        self.fields.iter().filter(move |f| f.oneof() == Some(oneof))
    }
}

pub struct RecordSchemaBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
    oneofs: Vec<OneofDescriptor>,
}

impl RecordSchemaBuilder {
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn oneof<I, S>(mut self, name: impl Into<String>, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.oneofs.push(OneofDescriptor {
            name: name.into(),
            markers: markers.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Validate names and numbers, then freeze the schema.
    pub fn build(self) -> Result<Arc<RecordSchema>, SchemaError> {
        let mut names = HashSet::new();
        let mut numbers = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) || !numbers.insert(field.number) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name.clone(),
                    field: field.name.clone(),
                });
            }
            if let Some(oneof) = field.oneof()
                && !self.oneofs.iter().any(|o| o.name == oneof)
            {
                return Err(SchemaError::UnknownOneof {
                    schema: self.name.clone(),
                    oneof: oneof.to_string(),
                });
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        for field in &self.fields {
            hasher.update(b"\0field\0");
            hasher.update(field.number.to_be_bytes());
            hasher.update(field.name.as_bytes());
            field.kind.fingerprint_into(&mut hasher);
            for marker in &field.markers {
                hasher.update(b"\0m\0");
                hasher.update(marker.as_bytes());
            }
            if let Some(oneof) = &field.oneof {
                hasher.update(b"\0in\0");
                hasher.update(oneof.as_bytes());
            }
        }
        for oneof in &self.oneofs {
            hasher.update(b"\0oneof\0");
            hasher.update(oneof.name.as_bytes());
            for marker in &oneof.markers {
                hasher.update(b"\0m\0");
                hasher.update(marker.as_bytes());
            }
        }

        Ok(Arc::new(RecordSchema {
            name: self.name,
            fields: self.fields,
            oneofs: self.oneofs,
            fingerprint: SchemaFingerprint(hasher.finalize().into()),
        }))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email_marker: Option<&str>) -> Arc<RecordSchema> {
        let mut email = FieldDescriptor::new(2, "email", FieldKind::String);
        if let Some(marker) = email_marker {
            email = email.marker(marker);
        }
        RecordSchema::builder("ContactInfo")
            .field(FieldDescriptor::new(1, "name", FieldKind::String))
            .field(email)
            .build()
            .unwrap()
    }

    #[test]
    fn fingerprint_is_stable_per_shape() {
        assert_eq!(contact(None).fingerprint(), contact(None).fingerprint());
        assert_ne!(contact(None).fingerprint(), contact(Some("x")).fingerprint());
    }

    #[test]
    fn fingerprint_covers_nested_schemas() {
        let outer = |inner| {
            RecordSchema::builder("Person")
                .field(FieldDescriptor::new(1, "contact", FieldKind::Message(inner)))
                .build()
                .unwrap()
        };
        assert_ne!(
            outer(contact(None)).fingerprint(),
            outer(contact(Some("x"))).fingerprint()
        );
    }

    #[test]
    fn duplicate_numbers_rejected() {
        let err = RecordSchema::builder("Broken")
            .field(FieldDescriptor::new(1, "a", FieldKind::String))
            .field(FieldDescriptor::new(1, "b", FieldKind::String))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { ref field, .. } if field == "b"));
    }

    #[test]
    fn undeclared_oneof_rejected() {
        let err = RecordSchema::builder("Broken")
            .field(FieldDescriptor::new(1, "a", FieldKind::String).in_oneof("ghost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownOneof { .. }));
    }

    #[test]
    fn oneof_fields_in_declaration_order() {
        let schema = RecordSchema::builder("Person")
            .oneof("pii", ["personal_data"])
            .field(FieldDescriptor::new(3, "phone", FieldKind::String).in_oneof("pii"))
            .field(FieldDescriptor::new(1, "uuid", FieldKind::String))
            .field(FieldDescriptor::new(2, "email", FieldKind::String).in_oneof("pii"))
            .build()
            .unwrap();
        let names: Vec<_> = schema.oneof_fields("pii").map(FieldDescriptor::name).collect();
        assert_eq!(names, ["phone", "email"]);
        assert!(schema.oneof("pii").unwrap().has_marker("personal_data"));
    }
}

//! Dynamic record instances over a [`RecordSchema`].

use std::{collections::BTreeMap, sync::Arc};

use shredder_crypto::EncryptedEnvelope;

use crate::{
    error::SchemaError,
    schema::{FieldDescriptor, FieldKind, RecordSchema},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int64(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    Message(RecordMessage),
    Encrypted(EncryptedEnvelope),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int64(_) => "int64",
            Self::Bool(_) => "bool",
            Self::Bytes(_) => "bytes",
            Self::Message(_) => "message",
            Self::Encrypted(_) => "encrypted personal data",
        }
    }

    fn fits(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (Self::String(_), FieldKind::String)
            | (Self::Int64(_), FieldKind::Int64)
            | (Self::Bool(_), FieldKind::Bool)
            | (Self::Bytes(_), FieldKind::Bytes)
            | (Self::Encrypted(_), FieldKind::EncryptedPersonalData) => true,
            (Self::Message(m), FieldKind::Message(schema)) => {
                m.schema().fingerprint() == schema.fingerprint()
            },
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<RecordMessage> for Value {
    fn from(m: RecordMessage) -> Self {
        Self::Message(m)
    }
}

/// A record instance. Unset fields are absent; setting a oneof alternative
/// clears its siblings.
#[derive(Debug, Clone)]
pub struct RecordMessage {
    schema: Arc<RecordSchema>,
    values: BTreeMap<u32, Value>,
}

impl PartialEq for RecordMessage {
    fn eq(&self, other: &Self) -> bool {
        self.schema.fingerprint() == other.schema.fingerprint() && self.values == other.values
    }
}

impl RecordMessage {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        Self {
            schema,
            values: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    fn descriptor(&self, name: &str) -> Result<&FieldDescriptor, SchemaError> {
        self.schema.field(name).ok_or_else(|| SchemaError::UnknownField {
            schema: self.schema.name().to_string(),
            field: name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let number = self.schema.field(name)?.number();
        self.values.get(&number)
    }

    pub fn get_by_number(&self, number: u32) -> Option<&Value> {
        self.values.get(&number)
    }

    pub(crate) fn get_mut_by_number(&mut self, number: u32) -> Option<&mut Value> {
        self.values.get_mut(&number)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SchemaError> {
        let number = self.descriptor(name)?.number();
        self.set_by_number(number, value.into())
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self, SchemaError> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn set_by_number(&mut self, number: u32, value: Value) -> Result<(), SchemaError> {
        let schema = Arc::clone(&self.schema);
        let field = schema
            .field_by_number(number)
            .ok_or_else(|| SchemaError::UnknownField {
                schema: schema.name().to_string(),
                field: format!("#{number}"),
            })?;

        if !value.fits(field.kind()) {
            return Err(SchemaError::KindMismatch {
                path: format!("{}.{}", schema.name(), field.name()),
                expected: field.kind().name(),
                found: value.kind_name(),
            });
        }

        if let Some(oneof) = field.oneof() {
            for sibling in schema.oneof_fields(oneof) {
                self.values.remove(&sibling.number());
            }
        }
        self.values.insert(number, value);
        Ok(())
    }

    /// Unset a field. Returns the previous value.
    pub fn clear(&mut self, name: &str) -> Option<Value> {
        let number = self.schema.field(name)?.number();
        self.values.remove(&number)
    }

    pub fn clear_by_number(&mut self, number: u32) -> Option<Value> {
        self.values.remove(&number)
    }

    /// The alternative currently set in the named oneof, if any.
    pub fn which_one_of(&self, oneof: &str) -> Option<&FieldDescriptor> {
        self.schema
            .oneof_fields(oneof)
            .find(|f| self.values.contains_key(&f.number()))
    }

    /// Set fields in field-number order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> {
        self.values
            .iter()
            .filter_map(|(number, value)| Some((self.schema.field_by_number(*number)?, value)))
    }
}

//! JSON form of records and field values.
//!
//! Field values are serialized with `serde_json` both for the bytes that get
//! encrypted and for rendering whole messages. Bytes fields are base64;
//! nested messages are objects keyed by field name.

use std::sync::Arc;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    serde_json::{Map, Value as Json},
    shredder_crypto::EncryptedEnvelope,
};

use crate::{
    message::{RecordMessage, Value},
    schema::{FieldKind, RecordSchema},
};

/// Serialize one field value.
pub fn value_to_json(value: &Value) -> serde_json::Result<Json> {
    Ok(match value {
        Value::String(s) => Json::String(s.clone()),
        Value::Int64(n) => Json::from(*n),
        Value::Bool(b) => Json::Bool(*b),
        Value::Bytes(b) => Json::String(STANDARD.encode(b)),
        Value::Message(m) => message_to_json(m)?,
        Value::Encrypted(envelope) => serde_json::to_value(envelope)?,
    })
}

pub fn message_to_json(message: &RecordMessage) -> serde_json::Result<Json> {
    let mut object = Map::new();
    for (field, value) in message.iter() {
        object.insert(field.name().to_string(), value_to_json(value)?);
    }
    Ok(Json::Object(object))
}

/// Parse a value of `kind`. Errors are plain descriptions; callers attach
/// the field path.
pub fn value_from_json(kind: &FieldKind, json: &Json) -> Result<Value, String> {
    let mismatch = || format!("expected {}, got {json}", kind.name());
    match kind {
        FieldKind::String => json.as_str().map(Value::from).ok_or_else(mismatch),
        FieldKind::Int64 => json.as_i64().map(Value::Int64).ok_or_else(mismatch),
        FieldKind::Bool => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
        FieldKind::Bytes => {
            let encoded = json.as_str().ok_or_else(mismatch)?;
            STANDARD
                .decode(encoded)
                .map(Value::Bytes)
                .map_err(|e| e.to_string())
        },
        FieldKind::Message(schema) => message_from_json(schema, json).map(Value::Message),
        FieldKind::EncryptedPersonalData => serde_json::from_value::<EncryptedEnvelope>(json.clone())
            .map(Value::Encrypted)
            .map_err(|e| e.to_string()),
    }
}

pub fn message_from_json(schema: &Arc<RecordSchema>, json: &Json) -> Result<RecordMessage, String> {
    let object = json
        .as_object()
        .ok_or_else(|| format!("expected {} object, got {json}", schema.name()))?;

    let mut message = RecordMessage::new(Arc::clone(schema));
    for (name, field_json) in object {
        if field_json.is_null() {
            continue;
        }
        let field = schema
            .field(name)
            .ok_or_else(|| format!("unknown field {name} in {}", schema.name()))?;
        let value = value_from_json(field.kind(), field_json).map_err(|e| format!("{name}: {e}"))?;
        message
            .set_by_number(field.number(), value)
            .map_err(|e| e.to_string())?;
    }
    Ok(message)
}

/// Bytes handed to the encryptor for `value`.
pub fn encode(value: &Value) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&value_to_json(value)?)
}

/// Inverse of [`encode`] for a field of `kind`.
pub fn decode(kind: &FieldKind, bytes: &[u8]) -> Result<Value, String> {
    let json: Json = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    value_from_json(kind, &json)
}

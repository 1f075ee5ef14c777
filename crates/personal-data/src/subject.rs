//! Locating the subject identifier that owns a personal-data container.

use tracing::debug;

use crate::{
    error::{PersonalDataError, SchemaError},
    message::{RecordMessage, Value},
    schema::{OneofDescriptor, RecordSchema},
};

/// Strategy resolving which field identifies the data owner of a container.
pub trait SubjectIdentifierFinder: Send + Sync {
    /// Reported in schema errors.
    fn strategy(&self) -> &'static str;

    /// `parent` is the schema declaring `container`; `path` names the
    /// container for error messages.
    fn find(
        &self,
        parent: &RecordSchema,
        container: &OneofDescriptor,
        path: &str,
    ) -> Result<SubjectIdentifierFieldDefinition, SchemaError>;
}

/// Picks the one field of the container's parent that carries the subject
/// identifier marker. Alternatives of the container itself are not
/// candidates: they get encrypted away.
pub struct SiblingFlagFinder {
    marker: String,
}

impl SiblingFlagFinder {
    pub const STRATEGY: &'static str = "sibling-field-flag";

    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl SubjectIdentifierFinder for SiblingFlagFinder {
    fn strategy(&self) -> &'static str {
        Self::STRATEGY
    }

    fn find(
        &self,
        parent: &RecordSchema,
        container: &OneofDescriptor,
        path: &str,
    ) -> Result<SubjectIdentifierFieldDefinition, SchemaError> {
        let candidates: Vec<_> = parent
            .fields()
            .iter()
            .filter(|f| f.oneof() != Some(container.name()) && f.has_marker(&self.marker))
            .collect();

        match candidates.as_slice() {
            [] => Err(SchemaError::SubjectIdentifierNotFound {
                strategy: Self::STRATEGY,
                path: path.to_string(),
            }),
            [field] => {
                debug!(container = path, subject_field = field.name(), "subject identifier resolved");
                Ok(SubjectIdentifierFieldDefinition {
                    number: field.number(),
                    path: format!("{}.{}", parent.name(), field.name()),
                })
            },
            many => Err(SchemaError::TooManySubjectIdentifiers {
                strategy: Self::STRATEGY,
                path: path.to_string(),
                count: many.len(),
            }),
        }
    }
}

/// The resolved subject identifier field of one container.
#[derive(Debug, Clone)]
pub struct SubjectIdentifierFieldDefinition {
    number: u32,
    path: String,
}

impl SubjectIdentifierFieldDefinition {
    pub fn field_number(&self) -> u32 {
        self.number
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The subject of `message`, which must be the container's parent.
    /// Scalars are stringified; unset or empty values are an error.
    pub fn subject_from(&self, message: &RecordMessage) -> Result<String, PersonalDataError> {
        let unavailable = |reason: &str| PersonalDataError::SubjectUnavailable {
            path: self.path.clone(),
            reason: reason.to_string(),
        };

        let subject = match message.get_by_number(self.number) {
            None => return Err(unavailable("not set")),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Int64(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Bytes(b)) => String::from_utf8(b.clone())
                .map_err(|_| unavailable("bytes are not valid UTF-8"))?,
            Some(other) => {
                return Err(unavailable(&format!(
                    "{} values cannot identify a subject",
                    other.kind_name()
                )));
            },
        };

        if subject.is_empty() {
            return Err(unavailable("empty"));
        }
        Ok(subject)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::schema::{FieldDescriptor, FieldKind},
        rstest::rstest,
        std::sync::Arc,
    };

    fn schema(subject_fields: &[(&str, FieldKind)]) -> Arc<RecordSchema> {
        let mut builder = RecordSchema::builder("Person")
            .oneof("contact_info", ["personal_data"])
            .field(FieldDescriptor::new(10, "email", FieldKind::String).in_oneof("contact_info"));
        for (i, (name, kind)) in subject_fields.iter().enumerate() {
            builder = builder
                .field(FieldDescriptor::new(i as u32 + 1, *name, kind.clone()).marker("subject_identifier"));
        }
        builder.build().unwrap()
    }

    fn find(schema: &RecordSchema) -> Result<SubjectIdentifierFieldDefinition, SchemaError> {
        let container = schema.oneof("contact_info").unwrap();
        SiblingFlagFinder::new("subject_identifier").find(schema, container, "Person.contact_info")
    }

    #[test]
    fn exactly_one_flagged_sibling() {
        let schema = schema(&[("uuid", FieldKind::String)]);
        let definition = find(&schema).unwrap();
        assert_eq!(definition.path(), "Person.uuid");
        assert_eq!(definition.field_number(), 1);
    }

    #[test]
    fn none_flagged_names_strategy_and_path() {
        let err = find(&schema(&[])).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::SubjectIdentifierNotFound { strategy: "sibling-field-flag", ref path } if path == "Person.contact_info"
        ));
        assert!(err.to_string().contains("Person.contact_info"));
    }

    #[test]
    fn two_flagged_is_an_error() {
        let err = find(&schema(&[
            ("uuid", FieldKind::String),
            ("account", FieldKind::Int64),
        ]))
        .unwrap_err();
        assert!(matches!(err, SchemaError::TooManySubjectIdentifiers { count: 2, .. }));
        assert!(err.to_string().contains("Person.contact_info"));
    }

    #[test]
    fn flagged_alternative_of_container_is_ignored() {
        let schema = RecordSchema::builder("Person")
            .oneof("contact_info", ["personal_data"])
            .field(FieldDescriptor::new(1, "uuid", FieldKind::String).marker("subject_identifier"))
            .field(
                FieldDescriptor::new(2, "email", FieldKind::String)
                    .in_oneof("contact_info")
                    .marker("subject_identifier"),
            )
            .build()
            .unwrap();
        assert_eq!(find(&schema).unwrap().path(), "Person.uuid");
    }

    #[rstest]
    #[case::string(FieldKind::String, Value::String("u1".into()), "u1")]
    #[case::int(FieldKind::Int64, Value::Int64(42), "42")]
    #[case::bool(FieldKind::Bool, Value::Bool(true), "true")]
    fn subject_is_stringified(#[case] kind: FieldKind, #[case] value: Value, #[case] expected: &str) {
        let schema = schema(&[("uuid", kind)]);
        let definition = find(&schema).unwrap();
        let mut message = RecordMessage::new(schema);
        message.set("uuid", value).unwrap();
        assert_eq!(definition.subject_from(&message).unwrap(), expected);
    }

    #[rstest]
    #[case::unset(None)]
    #[case::empty(Some(""))]
    fn missing_subject_is_unavailable(#[case] value: Option<&str>) {
        let schema = schema(&[("uuid", FieldKind::String)]);
        let definition = find(&schema).unwrap();
        let mut message = RecordMessage::new(schema);
        if let Some(v) = value {
            message.set("uuid", v).unwrap();
        }
        let err = definition.subject_from(&message).unwrap_err();
        assert!(matches!(err, PersonalDataError::SubjectUnavailable { ref path, .. } if path == "Person.uuid"));
    }
}

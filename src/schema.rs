// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Schema Validation
//!
//! Validation of inbound payloads against a user-provided JSON schema. The
//! `PayloadValidator` trait is the seam the pipeline depends on; the default
//! implementation compiles the schema with the `jsonschema` crate.
//!
//! The user schema describes the payload only. It is wrapped under the
//! envelope's `message` property before compiling, so violation paths come
//! out rooted at the envelope, e.g. `/message/field1`.

use crate::errors::{AmqpError, Violation};
use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use serde_json::{json, Value};

/// Validates a decoded message document.
pub trait PayloadValidator: Send + Sync {
    /// Checks the full envelope document, returning every violation found.
    fn validate(&self, document: &Value) -> Result<(), Vec<Violation>>;
}

/// `PayloadValidator` backed by a compiled JSON schema.
#[derive(Debug)]
pub struct JsonSchemaValidator {
    compiled: JSONSchema,
}

impl JsonSchemaValidator {
    /// Compiles a payload schema, wrapped under the envelope's `message`
    /// property.
    pub fn for_message_schema(schema: &Value) -> Result<JsonSchemaValidator, AmqpError> {
        let wrapped = json!({
            "type": "object",
            "properties": {
                "message": schema,
            },
        });

        let compiled = JSONSchema::compile(&wrapped)
            .map_err(|err| AmqpError::InvalidSchemaError(err.to_string()))?;

        Ok(JsonSchemaValidator { compiled })
    }
}

impl PayloadValidator for JsonSchemaValidator {
    fn validate(&self, document: &Value) -> Result<(), Vec<Violation>> {
        if let Err(errors) = self.compiled.validate(document) {
            let violations = errors
                .map(|err| Violation {
                    path: err.instance_path.to_string(),
                    rule: keyword(&err.kind).to_owned(),
                    message: err.to_string(),
                    value: err.instance.as_ref().clone(),
                })
                .collect::<Vec<_>>();

            return Err(violations);
        }

        Ok(())
    }
}

/// Maps a validation failure to the schema keyword it violated.
fn keyword(kind: &ValidationErrorKind) -> &'static str {
    match kind {
        ValidationErrorKind::Type { .. } => "type",
        ValidationErrorKind::Required { .. } => "required",
        ValidationErrorKind::AdditionalProperties { .. } => "additionalProperties",
        ValidationErrorKind::Enum { .. } => "enum",
        ValidationErrorKind::Format { .. } => "format",
        ValidationErrorKind::Pattern { .. } => "pattern",
        ValidationErrorKind::Constant { .. } => "const",
        ValidationErrorKind::Minimum { .. } => "minimum",
        ValidationErrorKind::Maximum { .. } => "maximum",
        ValidationErrorKind::ExclusiveMinimum { .. } => "exclusiveMinimum",
        ValidationErrorKind::ExclusiveMaximum { .. } => "exclusiveMaximum",
        ValidationErrorKind::MultipleOf { .. } => "multipleOf",
        ValidationErrorKind::MinLength { .. } => "minLength",
        ValidationErrorKind::MaxLength { .. } => "maxLength",
        ValidationErrorKind::MinItems { .. } => "minItems",
        ValidationErrorKind::MaxItems { .. } => "maxItems",
        ValidationErrorKind::MinProperties { .. } => "minProperties",
        ValidationErrorKind::MaxProperties { .. } => "maxProperties",
        ValidationErrorKind::UniqueItems { .. } => "uniqueItems",
        _ => "schema",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(payload: Value) -> Value {
        json!({"message": payload, "meta": {"id": "m-1", "publishedAt": 0}})
    }

    #[test]
    fn valid_payload_passes() {
        let schema = json!({
            "type": "object",
            "properties": {"field1": {"type": "string"}},
            "required": ["field1"],
        });
        let validator = JsonSchemaValidator::for_message_schema(&schema).unwrap();

        assert!(validator.validate(&document(json!({"field1": "ok"}))).is_ok());
    }

    #[test]
    fn type_mismatch_reports_path_and_rule() {
        let schema = json!({
            "type": "object",
            "properties": {"field1": {"type": "string"}},
        });
        let validator = JsonSchemaValidator::for_message_schema(&schema).unwrap();

        let violations = validator
            .validate(&document(json!({"field1": 123})))
            .unwrap_err();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/message/field1");
        assert_eq!(violations[0].rule, "type");
        assert_eq!(violations[0].value, json!(123));
    }

    #[test]
    fn missing_required_field_reports_required_rule() {
        let schema = json!({
            "type": "object",
            "properties": {"field1": {"type": "string"}},
            "required": ["field1"],
        });
        let validator = JsonSchemaValidator::for_message_schema(&schema).unwrap();

        let violations = validator.validate(&document(json!({}))).unwrap_err();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/message");
        assert_eq!(violations[0].rule, "required");
    }

    #[test]
    fn broken_schema_fails_to_compile() {
        let schema = json!({"type": "not-a-type"});
        let err = JsonSchemaValidator::for_message_schema(&schema).unwrap_err();
        assert!(matches!(err, AmqpError::InvalidSchemaError(_)));
    }
}

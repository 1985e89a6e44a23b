//! Payload classes (DTOs) for body and query binding.
//!
//! A [`DtoType`] names the declared class of a body or query parameter,
//! lists its fields, and knows how to validate and transform a raw JSON
//! payload into that class.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::FieldViolation;

/// Declared kind of a DTO field, used for query-string coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    /// Any JSON value; never coerced.
    Json,
}

/// Single field definition within a DTO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    pub kind: FieldKind,
    /// Whether the field must be present in every payload.
    pub required: bool,
}

impl FieldDef {
    #[must_use]
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Result of validating a payload against a DTO.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// The payload conforms; carries the transformed value.
    Valid(Value),
    /// The payload violates one or more constraints.
    Invalid {
        /// Per-field validation failures.
        errors: Vec<FieldViolation>,
    },
}

type Transform = Arc<dyn Fn(Value) -> ValidationResult + Send + Sync>;

/// A declared payload class.
#[derive(Clone)]
pub struct DtoType {
    name: String,
    fields: Vec<FieldDef>,
    transform: Transform,
}

impl DtoType {
    /// DTO backed by a serde + `validator` type: the payload is deserialized
    /// into `T`, validated, and serialized back.
    #[must_use]
    pub fn of<T>(name: impl Into<String>, fields: Vec<FieldDef>) -> Self
    where
        T: DeserializeOwned + Serialize + Validate + 'static,
    {
        Self {
            name: name.into(),
            fields,
            transform: Arc::new(transform_via::<T>),
        }
    }

    /// DTO with a custom transform.
    pub fn custom<F>(name: impl Into<String>, fields: Vec<FieldDef>, transform: F) -> Self
    where
        F: Fn(Value) -> ValidationResult + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fields,
            transform: Arc::new(transform),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Runs the class transform on an already shape-checked payload.
    #[must_use]
    pub fn transform(&self, value: Value) -> ValidationResult {
        (self.transform)(value)
    }
}

impl fmt::Debug for DtoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtoType")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

fn transform_via<T>(value: Value) -> ValidationResult
where
    T: DeserializeOwned + Serialize + Validate,
{
    let parsed: T = match serde_json::from_value(value) {
        Ok(parsed) => parsed,
        Err(err) => {
            return ValidationResult::Invalid {
                errors: vec![violation_from_serde(&err)],
            }
        }
    };
    if let Err(errors) = parsed.validate() {
        let mut violations = Vec::new();
        collect_violations(&errors, "", &mut violations);
        violations.sort_by(|a, b| a.field.cmp(&b.field));
        return ValidationResult::Invalid { errors: violations };
    }
    match serde_json::to_value(&parsed) {
        Ok(value) => ValidationResult::Valid(value),
        Err(err) => ValidationResult::Invalid {
            errors: vec![FieldViolation::new("payload", err.to_string())],
        },
    }
}

/// serde reports the offending field between backticks (``missing field `email` ``).
fn violation_from_serde(err: &serde_json::Error) -> FieldViolation {
    let message = err.to_string();
    let field = message
        .split('`')
        .nth(1)
        .filter(|_| message.starts_with("missing field") || message.starts_with("unknown field"))
        .unwrap_or("payload")
        .to_string();
    FieldViolation::new(field, message)
}

fn collect_violations(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldViolation>) {
    for (field, kind) in errors.errors() {
        let path = format!("{prefix}{field}");
        match kind {
            ValidationErrorsKind::Field(list) => out.push(FieldViolation {
                field: path,
                constraints: list
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or_else(|| e.code.to_string(), ToString::to_string)
                    })
                    .collect(),
            }),
            ValidationErrorsKind::Struct(nested) => {
                collect_violations(nested, &format!("{path}."), out);
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_violations(nested, &format!("{path}[{index}]."), out);
                }
            }
        }
    }
}

//! Parameter binding: extracts each handler argument from the request.

use std::sync::Arc;

use serde_json::{Map, Value};
use trellis_core::args::{Arg, Args};
use trellis_core::error::{FieldViolation, KernelError};
use trellis_core::http::{HttpRequest, ResponseHandle};
use trellis_core::route::{ParamBinding, ParamSource};
use trellis_core::schema::{DtoType, FieldKind, ValidationResult};

/// Binds `params` (in index order) against one request.
///
/// # Errors
///
/// Returns a validation error when a DTO-typed body or query parameter
/// does not conform to its class.
pub fn bind_params(
    params: &[ParamBinding],
    req: &Arc<HttpRequest>,
    res: &ResponseHandle,
) -> Result<Args, KernelError> {
    let mut sorted: Vec<&ParamBinding> = params.iter().collect();
    sorted.sort_by_key(|p| p.index);

    let mut args = Args::new();
    for param in sorted {
        let arg = match param.source {
            ParamSource::Body => match (&param.key, &param.dto) {
                (Some(key), _) => lookup(&req.body, key),
                (None, Some(dto)) => Arg::Value(validate_body(dto, &req.body)?),
                (None, None) => Arg::Value(req.body.clone()),
            },
            ParamSource::Query => match (&param.key, &param.dto) {
                (Some(key), _) => req.query.get(key).cloned().map_or(Arg::Missing, Arg::Value),
                (None, Some(dto)) => Arg::Value(validate_query(dto, &req.query)?),
                (None, None) => Arg::Value(Value::Object(req.query.clone())),
            },
            ParamSource::Param => match &param.key {
                Some(key) => req
                    .params
                    .get(key)
                    .map_or(Arg::Missing, |v| Arg::Value(Value::String(v.clone()))),
                None => Arg::Value(req.params_json()),
            },
            ParamSource::Headers => match &param.key {
                Some(key) => req
                    .header(&key.to_ascii_lowercase())
                    .map_or(Arg::Missing, |v| Arg::Value(Value::String(v.to_string()))),
                None => Arg::Value(req.headers_json()),
            },
            ParamSource::Request => Arg::Request(Arc::clone(req)),
            ParamSource::Response { .. } => Arg::Response(res.clone()),
            ParamSource::User => Arg::User(req.user.clone()),
        };
        args.set(param.index, arg);
    }
    Ok(args)
}

fn lookup(body: &Value, key: &str) -> Arg {
    body.get(key).cloned().map_or(Arg::Missing, Arg::Value)
}

/// Body payloads: unknown properties are rejected.
pub(crate) fn validate_body(dto: &DtoType, body: &Value) -> Result<Value, KernelError> {
    let object = match body {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        _ => {
            return Err(KernelError::validation(vec![FieldViolation::new(
                "body",
                format!("body must be a {} object", dto.name()),
            )]))
        }
    };

    let mut violations: Vec<FieldViolation> = object
        .keys()
        .filter(|key| dto.field(key).is_none())
        .map(|key| FieldViolation::new(key.clone(), format!("property {key} should not exist")))
        .collect();
    violations.extend(missing_required(dto, &object));
    if !violations.is_empty() {
        return Err(KernelError::validation(violations));
    }
    finish(dto, object)
}

/// Query payloads: unknown properties are dropped and string values are
/// coerced to the declared field kind.
pub(crate) fn validate_query(dto: &DtoType, query: &Map<String, Value>) -> Result<Value, KernelError> {
    let object: Map<String, Value> = query
        .iter()
        .filter_map(|(key, value)| {
            dto.field(key)
                .map(|field| (key.clone(), coerce(field.kind, value.clone())))
        })
        .collect();

    let violations = missing_required(dto, &object);
    if !violations.is_empty() {
        return Err(KernelError::validation(violations));
    }
    finish(dto, object)
}

fn missing_required(dto: &DtoType, object: &Map<String, Value>) -> Vec<FieldViolation> {
    dto.fields()
        .iter()
        .filter(|field| field.required && object.get(&field.name).is_none_or(Value::is_null))
        .map(|field| {
            FieldViolation::new(field.name.clone(), format!("{} should not be empty", field.name))
        })
        .collect()
}

fn finish(dto: &DtoType, object: Map<String, Value>) -> Result<Value, KernelError> {
    match dto.transform(Value::Object(object)) {
        ValidationResult::Valid(value) => Ok(value),
        ValidationResult::Invalid { errors } => Err(KernelError::validation(errors)),
    }
}

fn coerce(kind: FieldKind, value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(|v| coerce(kind, v)).collect()),
        Value::String(text) => coerce_str(kind, text),
        other => other,
    }
}

fn coerce_str(kind: FieldKind, text: String) -> Value {
    match kind {
        FieldKind::String => Value::String(text),
        FieldKind::Integer => text
            .parse::<i64>()
            .map_or(Value::String(text), Value::from),
        FieldKind::Number => match text.parse::<f64>() {
            Ok(n) => serde_json::Number::from_f64(n).map_or(Value::String(text), Value::Number),
            Err(_) => Value::String(text),
        },
        FieldKind::Boolean => match text.as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        FieldKind::Json => serde_json::from_str(&text).unwrap_or(Value::String(text)),
    }
}

//! Executes GraphQL requests against a [`Schema`].
//!
//! Root fields call their resolvers; nested selections are projected from
//! the returned JSON. A field error nulls the field, and a null in a
//! non-null position propagates to the nearest nullable parent.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, warn};
use trellis_core::error::KernelError;
use trellis_core::http::HttpRequest;

use super::parser::{parse, Field, Operation, OperationKind};
use super::schema::{RootField, RootType, Schema};
use super::types::{GraphQLType, ObjectType, Scalar};

const REDACTED: &str = "Internal server error";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A GraphQL request body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Map<String, Value>>,
    #[serde(default)]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn variables(mut self, variables: Value) -> Self {
        if let Value::Object(map) = variables {
            self.variables = Some(map);
        }
        self
    }
}

/// One entry of the response's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            extensions: None,
        }
    }

    fn at(mut self, path: &[Value]) -> Self {
        self.path = path.to_vec();
        self
    }

    /// Field error for a kernel error raised by a guard or resolver.
    fn from_kernel(err: &KernelError, path: &[Value], production: bool) -> Self {
        let status = err.status();
        let (code, message) = match err {
            KernelError::Unauthorized(_) => ("UNAUTHENTICATED", err.to_string()),
            KernelError::Forbidden(_) => ("FORBIDDEN", err.to_string()),
            KernelError::Validation { .. } => ("BAD_USER_INPUT", err.to_string()),
            _ if status.is_server_error() => (
                "INTERNAL_SERVER_ERROR",
                if production {
                    REDACTED.to_string()
                } else {
                    err.to_string()
                },
            ),
            _ => ("BAD_REQUEST", err.to_string()),
        };
        let mut extensions = json!({ "code": code, "status": status.as_u16() });
        if let KernelError::Validation { violations } = err {
            extensions["errors"] = json!(violations);
        }
        Self {
            message,
            path: path.to_vec(),
            extensions: Some(extensions),
        }
    }
}

/// A GraphQL response body. `data` is absent when the request failed
/// before execution started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    fn request_error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![GraphQLError::new(message)],
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Marks a null that must propagate to the parent.
struct Propagate;

struct Execution<'a> {
    variables: Map<String, Value>,
    request: &'a HttpRequest,
    production: bool,
    errors: parking_lot::Mutex<Vec<GraphQLError>>,
}

impl Execution<'_> {
    fn push(&self, err: GraphQLError) {
        self.errors.lock().push(err);
    }
}

/// Executes `request`. `http` is the transport request the guards see;
/// `production` redacts internal error messages.
pub async fn execute(schema: &Schema, request: GraphQLRequest, http: &HttpRequest, production: bool) -> GraphQLResponse {
    let document = match parse(&request.query) {
        Ok(document) => document,
        Err(err) => return GraphQLResponse::request_error(err.to_string()),
    };

    let operation = match select_operation(&document.operations, request.operation_name.as_deref()) {
        Ok(op) => op,
        Err(message) => return GraphQLResponse::request_error(message),
    };
    let root = match operation.kind {
        OperationKind::Query => schema.query(),
        OperationKind::Mutation => match schema.mutation() {
            Some(root) => root,
            None => return GraphQLResponse::request_error("Schema is not configured for mutations"),
        },
    };

    let validation = validate_root(root, &operation.selection);
    if !validation.is_empty() {
        return GraphQLResponse {
            data: None,
            errors: validation,
        };
    }

    let mut variables = request.variables.unwrap_or_default();
    for def in &operation.variables {
        if !variables.contains_key(&def.name) {
            if let Some(default) = def.default.as_ref().and_then(|d| d.resolve(&Map::new())) {
                variables.insert(def.name.clone(), default);
            }
        }
    }

    let exec = Execution {
        variables,
        request: http,
        production,
        errors: parking_lot::Mutex::new(Vec::new()),
    };

    let results: Vec<(String, Result<Value, Propagate>)> = match operation.kind {
        OperationKind::Query => {
            join_all(operation.selection.iter().map(|field| async {
                (field.response_key().to_string(), exec.root_field(root, field).await)
            }))
            .await
        }
        OperationKind::Mutation => {
            let mut results = Vec::new();
            for field in &operation.selection {
                results.push((field.response_key().to_string(), exec.root_field(root, field).await));
            }
            results
        }
    };

    let mut data = Map::new();
    let mut propagated = false;
    for (key, result) in results {
        match result {
            Ok(value) => {
                data.insert(key, value);
            }
            Err(Propagate) => propagated = true,
        }
    }
    GraphQLResponse {
        data: Some(if propagated { Value::Null } else { Value::Object(data) }),
        errors: exec.errors.into_inner(),
    }
}

fn select_operation<'a>(operations: &'a [Operation], name: Option<&str>) -> Result<&'a Operation, String> {
    match name {
        Some(name) => operations
            .iter()
            .find(|op| op.name.as_deref() == Some(name))
            .ok_or_else(|| format!("Unknown operation named \"{name}\".")),
        None if operations.len() == 1 => Ok(&operations[0]),
        None => Err("Must provide operation name if query contains multiple operations.".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_root(root: &RootType, selection: &[Field]) -> Vec<GraphQLError> {
    let mut errors = Vec::new();
    for field in selection {
        if field.name == "__typename" {
            continue;
        }
        match root.field(&field.name) {
            Some(def) => {
                for (arg, _) in &field.arguments {
                    if def.arg(arg).is_none() {
                        errors.push(GraphQLError::new(format!(
                            "Unknown argument \"{arg}\" on field \"{}.{}\".",
                            root.name, field.name
                        )));
                    }
                }
                validate_selection(&def.ty, field, &mut errors);
            }
            None => errors.push(GraphQLError::new(format!(
                "Cannot query field \"{}\" on type \"{}\".",
                field.name, root.name
            ))),
        }
    }
    errors
}

fn validate_selection(ty: &GraphQLType, field: &Field, errors: &mut Vec<GraphQLError>) {
    match ty {
        GraphQLType::List(inner) => validate_selection(inner, field, errors),
        GraphQLType::Object(object) => {
            if field.selection.is_empty() {
                errors.push(GraphQLError::new(format!(
                    "Field \"{}\" of type \"{}\" must have a selection of subfields.",
                    field.name,
                    ty.name()
                )));
            }
            for sub in &field.selection {
                if sub.name == "__typename" {
                    continue;
                }
                match object.field(&sub.name) {
                    Some(def) => validate_selection(&def.ty, sub, errors),
                    None => errors.push(GraphQLError::new(format!(
                        "Cannot query field \"{}\" on type \"{}\".",
                        sub.name,
                        object.name()
                    ))),
                }
            }
        }
        GraphQLType::Scalar(_) | GraphQLType::Input(_) => {
            if !field.selection.is_empty() {
                errors.push(GraphQLError::new(format!(
                    "Field \"{}\" must not have a selection since type \"{}\" has no subfields.",
                    field.name,
                    ty.name()
                )));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Field execution
// ---------------------------------------------------------------------------

impl Execution<'_> {
    async fn root_field(&self, root: &RootType, field: &Field) -> Result<Value, Propagate> {
        let path = vec![Value::String(field.response_key().to_string())];
        if field.name == "__typename" {
            return Ok(Value::String(root.name.to_string()));
        }
        let Some(def) = root.field(&field.name) else {
            return Ok(Value::Null);
        };

        let arguments = match self.coerce_arguments(def, field) {
            Ok(arguments) => arguments,
            Err(message) => {
                self.push(GraphQLError::new(message).at(&path));
                return self.null_for(def.nullable);
            }
        };

        match def.resolve(arguments, self.request).await {
            Ok(value) => self.complete(&def.ty, def.nullable, field, value, &path),
            Err(err) => {
                let status = err.status();
                if status.is_server_error() {
                    error!(field = %field.name, error = %err, "GraphQL resolver failed");
                } else {
                    warn!(field = %field.name, error = %err, "GraphQL resolver rejected");
                }
                self.push(GraphQLError::from_kernel(&err, &path, self.production));
                self.null_for(def.nullable)
            }
        }
    }

    fn null_for(&self, nullable: bool) -> Result<Value, Propagate> {
        if nullable {
            Ok(Value::Null)
        } else {
            Err(Propagate)
        }
    }

    fn coerce_arguments(&self, def: &RootField, field: &Field) -> Result<Map<String, Value>, String> {
        let mut provided = Map::new();
        for (name, value) in &field.arguments {
            if let Some(value) = value.resolve(&self.variables) {
                provided.insert(name.clone(), value);
            }
        }
        let mut out = Map::new();
        for arg in &def.args {
            match provided.remove(&arg.name) {
                Some(Value::Null) | None if !arg.nullable => {
                    return Err(format!(
                        "Argument \"{}\" of required type \"{}\" was not provided.",
                        arg.name,
                        arg.ty.display(true)
                    ));
                }
                Some(value) => {
                    let value = coerce_input(&arg.ty, value)
                        .map_err(|reason| format!("Argument \"{}\" has invalid value: {reason}", arg.name))?;
                    out.insert(arg.name.clone(), value);
                }
                None => {}
            }
        }
        Ok(out)
    }

    /// Projects `value` through `field`'s selection according to `ty`.
    fn complete(&self, ty: &GraphQLType, nullable: bool, field: &Field, value: Value, path: &[Value]) -> Result<Value, Propagate> {
        if value.is_null() {
            if !nullable {
                self.push(
                    GraphQLError::new(format!(
                        "Cannot return null for non-nullable field \"{}\".",
                        field.name
                    ))
                    .at(path),
                );
            }
            return self.null_for(nullable);
        }

        let completed = match ty {
            GraphQLType::Scalar(scalar) => serialize_scalar(*scalar, value).map_err(|reason| {
                self.push(GraphQLError::new(reason).at(path));
            }),
            GraphQLType::List(inner) => {
                let Value::Array(items) = value else {
                    self.push(
                        GraphQLError::new(format!("Expected a list for field \"{}\".", field.name)).at(path),
                    );
                    return self.null_for(nullable);
                };
                let mut out = Vec::with_capacity(items.len());
                let mut failed = false;
                for (i, item) in items.into_iter().enumerate() {
                    let mut item_path = path.to_vec();
                    item_path.push(Value::from(i));
                    match self.complete(inner, false, field, item, &item_path) {
                        Ok(v) => out.push(v),
                        Err(Propagate) => {
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    Err(())
                } else {
                    Ok(Value::Array(out))
                }
            }
            GraphQLType::Object(object) => self.complete_object(object, field, value, path),
            GraphQLType::Input(_) => Ok(value),
        };
        completed.or_else(|()| self.null_for(nullable))
    }

    fn complete_object(&self, object: &ObjectType, field: &Field, value: Value, path: &[Value]) -> Result<Value, ()> {
        let Value::Object(source) = value else {
            self.push(
                GraphQLError::new(format!(
                    "Expected an object of type \"{}\" for field \"{}\".",
                    object.name(),
                    field.name
                ))
                .at(path),
            );
            return Err(());
        };
        let mut out = Map::new();
        for sub in &field.selection {
            let key = sub.response_key().to_string();
            if sub.name == "__typename" {
                out.insert(key, Value::String(object.name().to_string()));
                continue;
            }
            let Some(def) = object.field(&sub.name) else {
                continue;
            };
            let mut sub_path = path.to_vec();
            sub_path.push(Value::String(key.clone()));
            let raw = source.get(&sub.name).cloned().unwrap_or(Value::Null);
            match self.complete(&def.ty, def.nullable, sub, raw, &sub_path) {
                Ok(v) => {
                    out.insert(key, v);
                }
                Err(Propagate) => return Err(()),
            }
        }
        Ok(Value::Object(out))
    }
}

fn serialize_scalar(scalar: Scalar, value: Value) -> Result<Value, String> {
    match (scalar, value) {
        (Scalar::Json, v) => Ok(v),
        (Scalar::String, Value::String(s)) => Ok(Value::String(s)),
        (Scalar::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (Scalar::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
        (Scalar::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (Scalar::Int, Value::Number(n)) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => Ok(Value::from(i)),
            _ => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() <= f64::from(i32::MAX) => Ok(Value::from(f as i64)),
                _ => Err(format!("Int cannot represent non 32-bit signed integer value: {n}")),
            },
        },
        (Scalar::Float, Value::Number(n)) => Ok(Value::Number(n)),
        (scalar, other) => Err(format!("{} cannot represent value: {other}", scalar.name())),
    }
}

/// Coerces an argument value to its declared input type.
fn coerce_input(ty: &GraphQLType, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(value);
    }
    match ty {
        GraphQLType::Scalar(Scalar::Json) => Ok(value),
        GraphQLType::Scalar(Scalar::String) => match value {
            Value::String(_) => Ok(value),
            other => Err(format!("String cannot represent a non string value: {other}")),
        },
        GraphQLType::Scalar(Scalar::Boolean) => match value {
            Value::Bool(_) => Ok(value),
            other => Err(format!("Boolean cannot represent a non boolean value: {other}")),
        },
        GraphQLType::Scalar(Scalar::Int) => match value.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => Ok(value),
            _ => Err(format!("Int cannot represent non-integer value: {value}")),
        },
        GraphQLType::Scalar(Scalar::Float) => match value {
            Value::Number(_) => Ok(value),
            other => Err(format!("Float cannot represent non numeric value: {other}")),
        },
        GraphQLType::List(inner) => match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| coerce_input(inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            single => Ok(Value::Array(vec![coerce_input(inner, single)?])),
        },
        GraphQLType::Input(object) | GraphQLType::Object(object) => {
            let Value::Object(mut fields) = value else {
                return Err(format!("Expected type \"{}\" to be an object.", object.name()));
            };
            let mut out = Map::new();
            for def in object.fields() {
                match fields.remove(&def.name) {
                    Some(v) => {
                        out.insert(def.name.clone(), coerce_input(&def.ty, v)?);
                    }
                    None if !def.nullable => {
                        return Err(format!(
                            "Field \"{}.{}\" of required type \"{}\" was not provided.",
                            object.name(),
                            def.name,
                            def.ty.display(true)
                        ));
                    }
                    None => {}
                }
            }
            if let Some(unknown) = fields.keys().next() {
                return Err(format!(
                    "Field \"{unknown}\" is not defined by type \"{}\".",
                    object.name()
                ));
            }
            Ok(Value::Object(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::Method;
    use trellis_core::args::Args;
    use trellis_core::class::ClassMeta;
    use trellis_core::graphql::{
        ArgDescriptor, FieldDescriptor, ObjectTypeMeta, QueryDescriptor, ResolverMeta, ResolverMethod, TypeRef,
    };
    use trellis_core::handler::method_fn;
    use trellis_core::provider::ProviderDescriptor;
    use trellis_core::registry::MetadataRegistry;
    use trellis_core::traits::TokenVerifier;
    use trellis_core::types::Principal;

    use super::*;
    use crate::graphql::builder::SchemaBuilder;
    use crate::routing::guards::{JwtVerifier, TOKEN_VERIFIER};
    use crate::service::container::Container;
    use crate::service::registries::ResolverRegistry;

    struct Book;
    struct NewBook;
    struct Library;

    fn schema() -> (Schema, JwtVerifier) {
        let registry = MetadataRegistry::builder()
            .object_type(
                ObjectTypeMeta::object::<Book>("Book")
                    .field(FieldDescriptor::new("id", || TypeRef::Int))
                    .field(FieldDescriptor::new("title", || TypeRef::String))
                    .field(FieldDescriptor::new("sequel", || TypeRef::class::<Book>()).nullable()),
            )
            .object_type(
                ObjectTypeMeta::input::<NewBook>("NewBook")
                    .field(FieldDescriptor::new("title", || TypeRef::String)),
            )
            .build();

        let class = ClassMeta::unit::<Library>("Library", || Library);
        let meta = ResolverMeta::builder(Arc::clone(&class))
            .public()
            .method(
                ResolverMethod::builder("books")
                    .query(QueryDescriptor::new(|| TypeRef::list(TypeRef::class::<Book>())))
                    .handler(method_fn(|_: Arc<Library>, _| async {
                        Ok(Some(json!([
                            {"id": 1, "title": "Dune", "sequel": {"id": 2, "title": "Messiah"}},
                            {"id": 2, "title": "Messiah", "secret": "x"}
                        ])))
                    })),
            )
            .method(
                ResolverMethod::builder("book")
                    .query(QueryDescriptor::new(|| TypeRef::class::<Book>()).nullable())
                    .arg(ArgDescriptor::named(0, "id", || TypeRef::Int))
                    .handler(method_fn(|_: Arc<Library>, args: Args| async move {
                        let id = args.value(0).and_then(Value::as_i64).unwrap_or_default();
                        Ok((id == 1).then(|| json!({"id": 1, "title": null})))
                    })),
            )
            .method(
                ResolverMethod::builder("addBook")
                    .mutation(QueryDescriptor::new(|| TypeRef::class::<Book>()))
                    .arg(ArgDescriptor::named(0, "input", || TypeRef::class::<NewBook>()))
                    .roles(["librarian"])
                    .handler(method_fn(|_: Arc<Library>, args: Args| async move {
                        let title = args.value(0).and_then(|v| v.get("title")).cloned();
                        Ok(Some(json!({"id": 3, "title": title})))
                    })),
            )
            .build();

        let container = Arc::new(Container::new());
        let jwt = JwtVerifier::new(Some("lib".into()));
        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(Some("lib".into())));
        container
            .register(ProviderDescriptor::value(TOKEN_VERIFIER, verifier))
            .unwrap();
        container.register_class(class).unwrap();
        let resolvers = ResolverRegistry::new();
        resolvers.add(meta);
        let schema = SchemaBuilder::new(container, registry, Arc::new(resolvers))
            .build()
            .unwrap();
        (schema, jwt)
    }

    fn http() -> HttpRequest {
        HttpRequest::new(Method::POST, "/graphql")
    }

    #[tokio::test]
    async fn projects_nested_selections_with_aliases() {
        let (schema, _) = schema();
        let res = execute(
            &schema,
            GraphQLRequest::new("{ list: books { id sequel { title __typename } } }"),
            &http(),
            false,
        )
        .await;
        assert!(res.is_ok(), "{:?}", res.errors);
        assert_eq!(
            res.data,
            Some(json!({"list": [
                {"id": 1, "sequel": {"title": "Messiah", "__typename": "Book"}},
                {"id": 2, "sequel": null}
            ]}))
        );
    }

    #[tokio::test]
    async fn null_in_non_null_field_propagates_to_nullable_parent() {
        let (schema, _) = schema();
        let res = execute(&schema, GraphQLRequest::new("{ book(id: 1) { id title } }"), &http(), false).await;
        assert_eq!(res.data, Some(json!({"book": null})));
        assert_eq!(res.errors[0].path, vec![json!("book"), json!("title")]);
    }

    #[tokio::test]
    async fn variables_and_defaults_are_applied() {
        let (schema, _) = schema();
        let res = execute(
            &schema,
            GraphQLRequest::new("query Q($id: Int = 2) { book(id: $id) { id } }"),
            &http(),
            false,
        )
        .await;
        assert_eq!(res.data, Some(json!({"book": null})));
        assert!(res.is_ok());

        let res = execute(
            &schema,
            GraphQLRequest::new("query Q($id: Int) { book(id: $id) { id } }").variables(json!({"id": "one"})),
            &http(),
            false,
        )
        .await;
        assert!(res.errors[0].message.contains("Int cannot represent"));
    }

    #[tokio::test]
    async fn validation_errors_skip_execution() {
        let (schema, _) = schema();
        let res = execute(&schema, GraphQLRequest::new("{ books { isbn } }"), &http(), false).await;
        assert_eq!(res.data, None);
        assert_eq!(res.errors[0].message, "Cannot query field \"isbn\" on type \"Book\".");

        let res = execute(&schema, GraphQLRequest::new("{ books }"), &http(), false).await;
        assert!(res.errors[0].message.contains("must have a selection"));

        let res = execute(&schema, GraphQLRequest::new("{ books { id } "), &http(), false).await;
        assert!(res.errors[0].message.starts_with("Syntax Error"));
    }

    #[tokio::test]
    async fn mutation_guards_use_transport_credentials() {
        let (schema, jwt) = schema();
        let query = r#"mutation { addBook(input: { title: "Emma" }) { id title } }"#;

        let res = execute(&schema, GraphQLRequest::new(query), &http(), false).await;
        assert_eq!(res.data, Some(Value::Null));
        assert_eq!(res.errors[0].extensions.as_ref().unwrap()["code"], "FORBIDDEN");
        assert_eq!(res.errors[0].path, vec![json!("addBook")]);

        let token = jwt.sign(&Principal::new("u1", ["librarian"]), 60).unwrap();
        let req = http().with_header("authorization", &format!("Bearer {token}"));
        let res = execute(&schema, GraphQLRequest::new(query), &req, false).await;
        assert!(res.is_ok(), "{:?}", res.errors);
        assert_eq!(res.data, Some(json!({"addBook": {"id": 3, "title": "Emma"}})));
    }

    #[tokio::test]
    async fn input_objects_reject_unknown_fields() {
        let (schema, _) = schema();
        let res = execute(
            &schema,
            GraphQLRequest::new(r#"mutation { addBook(input: { title: "x", year: 1 }) { id } }"#),
            &http(),
            false,
        )
        .await;
        assert!(res.errors[0].message.contains("\"year\" is not defined"));
    }

    #[tokio::test]
    async fn operation_selection_by_name() {
        let (schema, _) = schema();
        let doc = "query A { books { id } } query B { __typename }";
        let res = execute(&schema, GraphQLRequest::new(doc), &http(), false).await;
        assert!(res.errors[0].message.contains("operation name"));

        let mut req = GraphQLRequest::new(doc);
        req.operation_name = Some("B".into());
        let res = execute(&schema, req, &http(), false).await;
        assert_eq!(res.data, Some(json!({"__typename": "Query"})));
    }
}

//! The built schema: root types, their fields and resolvers, and the SDL
//! printer.

use std::sync::Arc;

use serde_json::{Map, Value};
use trellis_core::args::{Arg, Args};
use trellis_core::class::Instance;
use trellis_core::error::KernelError;
use trellis_core::graphql::ArgDescriptor;
use trellis_core::handler::Invocation;
use trellis_core::http::HttpRequest;
use trellis_core::traits::{Guard, HandlerInfo};

use super::types::{GraphQLType, TypeResolver};
use crate::routing::pipeline::{invoke, run_guards};
use crate::service::middleware::SharedHandler;

/// Name of the field added to `Query` when no query was declared.
pub const PLACEHOLDER_FIELD: &str = "_placeholder";

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// One argument exposed on a root field.
#[derive(Debug, Clone)]
pub struct InputArg {
    pub name: String,
    pub ty: GraphQLType,
    pub nullable: bool,
}

/// Calls a resolver method for one field, behind the same guard chain as
/// REST handlers.
pub struct FieldResolver {
    pub(crate) target: Instance,
    pub(crate) info: HandlerInfo,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
    /// Sorted by index.
    pub(crate) params: Vec<ArgDescriptor>,
    /// For each aggregated args-object parameter, the names of the flattened
    /// arguments it is rebuilt from.
    pub(crate) args_objects: Vec<(usize, Vec<String>)>,
    pub(crate) handler: SharedHandler,
}

impl FieldResolver {
    /// Runs the guards against a private copy of `request`, then invokes the
    /// method with arguments rebuilt from `arguments`.
    ///
    /// # Errors
    ///
    /// Returns the first guard rejection or the handler's error.
    pub async fn resolve(&self, arguments: Map<String, Value>, request: &HttpRequest) -> Result<Value, KernelError> {
        let mut request = request.clone();
        run_guards(&self.guards, &mut request, None, &self.info).await?;

        let args = self.bind(arguments, &request);
        let inv = Invocation::new(
            Arc::clone(&self.target),
            args,
            &self.info.class_name,
            &self.info.method_name,
        );
        Ok(invoke(self.handler.service(), inv).await?.unwrap_or(Value::Null))
    }

    fn bind(&self, mut arguments: Map<String, Value>, request: &HttpRequest) -> Args {
        let mut args = Args::new();
        for param in &self.params {
            let arg = if param.is_current_user {
                Arg::User(request.user.clone())
            } else if param.is_args_object {
                let names = self
                    .args_objects
                    .iter()
                    .find(|(index, _)| *index == param.index)
                    .map(|(_, names)| names.as_slice())
                    .unwrap_or_default();
                let object: Map<String, Value> = names
                    .iter()
                    .filter_map(|name| arguments.get(name).map(|v| (name.clone(), v.clone())))
                    .collect();
                Arg::Value(Value::Object(object))
            } else if let Some(name) = &param.name {
                arguments.remove(name).map_or(Arg::Missing, Arg::Value)
            } else {
                Arg::Value(Value::Object(arguments.clone()))
            };
            args.set(param.index, arg);
        }
        args
    }
}

/// A field of `Query` or `Mutation`.
pub struct RootField {
    pub name: String,
    pub ty: GraphQLType,
    pub nullable: bool,
    pub args: Vec<InputArg>,
    /// `None` for the placeholder field, which always resolves to null.
    pub(crate) resolver: Option<FieldResolver>,
}

impl RootField {
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&InputArg> {
        self.args.iter().find(|a| a.name == name)
    }

    pub(crate) async fn resolve(&self, arguments: Map<String, Value>, request: &HttpRequest) -> Result<Value, KernelError> {
        match &self.resolver {
            Some(resolver) => resolver.resolve(arguments, request).await,
            None => Ok(Value::Null),
        }
    }
}

/// `Query` or `Mutation`.
pub struct RootType {
    pub name: &'static str,
    pub fields: Vec<RootField>,
}

impl RootType {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&RootField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// A runtime schema: `Query`, optionally `Mutation`, and every object and
/// input type reachable from them.
pub struct Schema {
    pub(crate) query: RootType,
    pub(crate) mutation: Option<RootType>,
    pub(crate) types: Arc<TypeResolver>,
}

impl Schema {
    #[must_use]
    pub fn query(&self) -> &RootType {
        &self.query
    }

    #[must_use]
    pub fn mutation(&self) -> Option<&RootType> {
        self.mutation.as_ref()
    }

    /// Object and input types, in the order they were first referenced.
    #[must_use]
    pub fn types(&self) -> Vec<GraphQLType> {
        self.types.types()
    }

    /// Prints the schema in SDL.
    #[must_use]
    pub fn to_sdl(&self) -> String {
        let mut out = String::from("scalar JSON\n");
        for ty in self.types() {
            let (keyword, object) = match &ty {
                GraphQLType::Object(obj) => ("type", obj),
                GraphQLType::Input(obj) => ("input", obj),
                _ => continue,
            };
            out.push_str(&format!("\n{keyword} {} {{\n", object.name()));
            for field in object.fields() {
                out.push_str(&format!("  {}: {}\n", field.name, field.ty.display(!field.nullable)));
            }
            out.push_str("}\n");
        }
        for root in std::iter::once(&self.query).chain(self.mutation.as_ref()) {
            out.push_str(&format!("\ntype {} {{\n", root.name));
            for field in &root.fields {
                out.push_str("  ");
                out.push_str(&field.name);
                if !field.args.is_empty() {
                    let args: Vec<String> = field
                        .args
                        .iter()
                        .map(|a| format!("{}: {}", a.name, a.ty.display(!a.nullable)))
                        .collect();
                    out.push_str(&format!("({})", args.join(", ")));
                }
                out.push_str(&format!(": {}\n", field.ty.display(!field.nullable)));
            }
            out.push_str("}\n");
        }
        out
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("query", &self.query.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .field(
                "mutation",
                &self
                    .mutation
                    .as_ref()
                    .map(|m| m.fields.iter().map(|f| &f.name).collect::<Vec<_>>()),
            )
            .finish_non_exhaustive()
    }
}

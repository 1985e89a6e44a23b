//! Schema builder: synthesizes `Query` and `Mutation` from resolver
//! metadata.

use std::sync::Arc;

use tracing::{debug, info};
use trellis_core::class::Instance;
use trellis_core::graphql::{QueryDescriptor, ResolverMeta, ResolverMethod, TypeRef};
use trellis_core::registry::MetadataRegistry;
use trellis_core::traits::{Guard, HandlerInfo, HandlerKind};

use super::schema::{FieldResolver, InputArg, RootField, RootType, Schema, PLACEHOLDER_FIELD};
use super::types::{GraphQLType, Scalar, TypeResolver};
use crate::error::RegistrationError;
use crate::routing::pipeline::{effective_roles, resolve_guard_chain};
use crate::service::container::Container;
use crate::service::middleware::SharedHandler;
use crate::service::registries::ResolverRegistry;

/// Builds a [`Schema`] from every resolver in a [`ResolverRegistry`].
pub struct SchemaBuilder {
    container: Arc<Container>,
    resolvers: Arc<ResolverRegistry>,
    types: Arc<TypeResolver>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn new(
        container: Arc<Container>,
        registry: Arc<MetadataRegistry>,
        resolvers: Arc<ResolverRegistry>,
    ) -> Self {
        Self {
            container,
            resolvers,
            types: TypeResolver::new(registry),
        }
    }

    /// Builds the schema.
    ///
    /// `Query` always has at least one field: a nullable placeholder is
    /// added when no resolver declares a query. `Mutation` exists only when
    /// some resolver declares a mutation.
    ///
    /// # Errors
    ///
    /// Fails when a resolver or guard cannot be resolved, when two fields
    /// of a root type share a name, or when an args object does not refer
    /// to an input type.
    pub fn build(self) -> Result<Schema, RegistrationError> {
        let mut query = RootType {
            name: "Query",
            fields: Vec::new(),
        };
        let mut mutation = RootType {
            name: "Mutation",
            fields: Vec::new(),
        };

        for resolver in self.resolvers.all() {
            let target = self.container.resolve(&resolver.class.token())?;
            for method in &resolver.methods {
                if let Some(desc) = &method.query {
                    let field = self.field(&resolver, method, desc, &target)?;
                    push_field(&mut query, field)?;
                }
                if let Some(desc) = &method.mutation {
                    let field = self.field(&resolver, method, desc, &target)?;
                    push_field(&mut mutation, field)?;
                }
            }
        }

        if query.fields.is_empty() {
            query.fields.push(RootField {
                name: PLACEHOLDER_FIELD.to_string(),
                ty: GraphQLType::Scalar(Scalar::String),
                nullable: true,
                args: Vec::new(),
                resolver: None,
            });
        }
        self.types.realize_all();

        info!(
            queries = query.fields.len(),
            mutations = mutation.fields.len(),
            types = self.types.types().len(),
            "GraphQL schema built"
        );
        Ok(Schema {
            query,
            mutation: (!mutation.fields.is_empty()).then_some(mutation),
            types: self.types,
        })
    }

    fn field(
        &self,
        resolver: &ResolverMeta,
        method: &ResolverMethod,
        desc: &QueryDescriptor,
        target: &Instance,
    ) -> Result<RootField, RegistrationError> {
        let name = desc.name.clone().unwrap_or_else(|| method.name.clone());
        let label = format!("{}.{}", resolver.descriptor.name, method.name);

        let mut params = method.args.clone();
        params.sort_by_key(|a| a.index);

        let mut args = Vec::new();
        let mut args_objects = Vec::new();
        for param in &params {
            if param.is_current_user {
                continue;
            }
            if param.is_args_object {
                let ty = param.type_thunk.as_ref().map_or(TypeRef::Json, |t| t());
                let GraphQLType::Input(object) = self.types.resolve(&ty) else {
                    return Err(RegistrationError::Schema(format!(
                        "args object #{} of {label} is not an input type",
                        param.index
                    )));
                };
                let mut names = Vec::new();
                for field in object.fields() {
                    names.push(field.name.clone());
                    args.push(InputArg {
                        name: field.name.clone(),
                        ty: field.ty.clone(),
                        nullable: field.nullable,
                    });
                }
                args_objects.push((param.index, names));
            } else if let Some(arg_name) = &param.name {
                let ty = param.type_thunk.as_ref().map_or(TypeRef::String, |t| t());
                args.push(InputArg {
                    name: arg_name.clone(),
                    ty: self.types.resolve(&ty),
                    nullable: param.nullable,
                });
            }
        }
        if let Some(dup) = args
            .iter()
            .enumerate()
            .find(|(i, a)| args[..*i].iter().any(|b| b.name == a.name))
        {
            return Err(RegistrationError::Schema(format!(
                "argument \"{}\" is declared twice on {label}",
                dup.1.name
            )));
        }

        let guards: Vec<Arc<dyn Guard>> =
            resolve_guard_chain(&self.container, &resolver.guards, &method.guards, &label)?;
        let info = HandlerInfo {
            class_name: resolver.descriptor.name.clone(),
            method_name: method.name.clone(),
            kind: HandlerKind::GraphQL,
            roles: effective_roles(&resolver.roles, &method.roles),
            public: resolver.public || method.public,
        };
        debug!(field = %name, handler = %label, "GraphQL field registered");

        Ok(RootField {
            name,
            ty: self.types.resolve(&(desc.return_type)()),
            nullable: desc.nullable,
            args,
            resolver: Some(FieldResolver {
                target: Arc::clone(target),
                info,
                guards,
                params,
                args_objects,
                handler: SharedHandler::compose(Arc::clone(&method.handler), &method.decorators),
            }),
        })
    }
}

fn push_field(root: &mut RootType, field: RootField) -> Result<(), RegistrationError> {
    if root.field(&field.name).is_some() {
        return Err(RegistrationError::Schema(format!(
            "field \"{}\" is defined twice on {}",
            field.name, root.name
        )));
    }
    root.fields.push(field);
    Ok(())
}

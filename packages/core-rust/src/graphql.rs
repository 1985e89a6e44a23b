//! GraphQL descriptors: resolvers, queries, mutations, arguments and
//! object/input types.
//!
//! Type references are carried as thunks so that mutually-referencing types
//! can be described before either is defined.

use std::fmt;
use std::sync::Arc;

use crate::class::ClassRef;
use crate::handler::{Decorator, MethodHandler};
use crate::token::TypeKey;
use crate::traits::GuardRef;

// ---------------------------------------------------------------------------
// Type references
// ---------------------------------------------------------------------------

/// A source type as seen by the schema builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    String,
    /// Generic numeric marker; resolves to `Int`.
    Number,
    Int,
    Float,
    Boolean,
    /// Permissive JSON/object marker.
    Json,
    List(Box<TypeRef>),
    /// A class that may carry object-type or input-type metadata.
    Class(TypeKey),
    /// Anything else; falls back to `String`.
    Other(&'static str),
}

impl TypeRef {
    #[must_use]
    pub fn class<T: 'static>() -> Self {
        Self::Class(TypeKey::of::<T>())
    }

    #[must_use]
    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }
}

/// Lazily evaluated type reference.
pub type TypeThunk = Arc<dyn Fn() -> TypeRef + Send + Sync>;

/// Wraps a plain function or closure as a [`TypeThunk`].
pub fn thunk<F>(f: F) -> TypeThunk
where
    F: Fn() -> TypeRef + Send + Sync + 'static,
{
    Arc::new(f)
}

struct ThunkDebug<'a>(&'a Option<TypeThunk>);

impl fmt::Debug for ThunkDebug<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("Some(<thunk>)"),
            None => f.write_str("None"),
        }
    }
}

// ---------------------------------------------------------------------------
// Field and argument descriptors
// ---------------------------------------------------------------------------

/// One field of an object, input or args type.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: String,
    /// `None` falls back to `String`.
    pub type_thunk: Option<TypeThunk>,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn new<F>(name: &str, ty: F) -> Self
    where
        F: Fn() -> TypeRef + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            type_thunk: Some(thunk(ty)),
            nullable: false,
        }
    }

    /// Field without an explicit type.
    #[must_use]
    pub fn untyped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_thunk: None,
            nullable: false,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn type_ref(&self) -> TypeRef {
        self.type_thunk.as_ref().map_or(TypeRef::String, |t| t())
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("type_thunk", &ThunkDebug(&self.type_thunk))
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// One argument of a query or mutation method, positioned by `index`.
#[derive(Clone)]
pub struct ArgDescriptor {
    pub index: usize,
    /// Without a name the parameter receives the whole argument map.
    pub name: Option<String>,
    pub type_thunk: Option<TypeThunk>,
    /// Expands into one argument per field of the referenced type.
    pub is_args_object: bool,
    /// Bound to the authenticated principal; not exposed in the schema.
    pub is_current_user: bool,
    pub nullable: bool,
}

impl ArgDescriptor {
    pub fn named<F>(index: usize, name: &str, ty: F) -> Self
    where
        F: Fn() -> TypeRef + Send + Sync + 'static,
    {
        Self {
            index,
            name: Some(name.to_string()),
            type_thunk: Some(thunk(ty)),
            is_args_object: false,
            is_current_user: false,
            nullable: false,
        }
    }

    /// Aggregated args object of type `ty`.
    pub fn args_object<F>(index: usize, ty: F) -> Self
    where
        F: Fn() -> TypeRef + Send + Sync + 'static,
    {
        Self {
            index,
            name: None,
            type_thunk: Some(thunk(ty)),
            is_args_object: true,
            is_current_user: false,
            nullable: false,
        }
    }

    #[must_use]
    pub fn current_user(index: usize) -> Self {
        Self {
            index,
            name: None,
            type_thunk: None,
            is_args_object: false,
            is_current_user: true,
            nullable: true,
        }
    }

    /// Unnamed argument receiving the raw argument map.
    #[must_use]
    pub fn all(index: usize) -> Self {
        Self {
            index,
            name: None,
            type_thunk: None,
            is_args_object: false,
            is_current_user: false,
            nullable: true,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl fmt::Debug for ArgDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgDescriptor")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("type_thunk", &ThunkDebug(&self.type_thunk))
            .field("is_args_object", &self.is_args_object)
            .field("is_current_user", &self.is_current_user)
            .field("nullable", &self.nullable)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Object types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Object,
    Input,
    /// Args-object type; synthesized as an input type.
    Args,
}

/// Object-type or input-type metadata attached to a class.
#[derive(Debug, Clone)]
pub struct ObjectTypeMeta {
    pub key: TypeKey,
    pub name: String,
    pub kind: ObjectKind,
    pub fields: Vec<FieldDescriptor>,
}

impl ObjectTypeMeta {
    #[must_use]
    pub fn object<T: 'static>(name: &str) -> Self {
        Self::new::<T>(name, ObjectKind::Object)
    }

    #[must_use]
    pub fn input<T: 'static>(name: &str) -> Self {
        Self::new::<T>(name, ObjectKind::Input)
    }

    #[must_use]
    pub fn args<T: 'static>(name: &str) -> Self {
        Self::new::<T>(name, ObjectKind::Args)
    }

    fn new<T: 'static>(name: &str, kind: ObjectKind) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            name: name.to_string(),
            kind,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn is_input(&self) -> bool {
        matches!(self.kind, ObjectKind::Input | ObjectKind::Args)
    }
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverDescriptor {
    pub name: String,
}

/// Query field attached to a resolver method. Without a name the field is
/// named after the method.
#[derive(Clone)]
pub struct QueryDescriptor {
    pub name: Option<String>,
    pub return_type: TypeThunk,
    pub nullable: bool,
}

impl QueryDescriptor {
    pub fn new<F>(return_type: F) -> Self
    where
        F: Fn() -> TypeRef + Send + Sync + 'static,
    {
        Self {
            name: None,
            return_type: thunk(return_type),
            nullable: false,
        }
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

impl fmt::Debug for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDescriptor")
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .finish_non_exhaustive()
    }
}

/// Mutation fields are described exactly like query fields.
pub type MutationDescriptor = QueryDescriptor;

/// One method of a resolver class.
#[derive(Clone)]
pub struct ResolverMethod {
    pub name: String,
    pub query: Option<QueryDescriptor>,
    pub mutation: Option<MutationDescriptor>,
    pub args: Vec<ArgDescriptor>,
    pub guards: Vec<GuardRef>,
    pub roles: Vec<String>,
    pub public: bool,
    pub decorators: Vec<Decorator>,
    pub handler: MethodHandler,
}

impl ResolverMethod {
    pub fn builder(name: impl Into<String>) -> ResolverMethodBuilder {
        ResolverMethodBuilder {
            name: name.into(),
            query: None,
            mutation: None,
            args: Vec::new(),
            guards: Vec::new(),
            roles: Vec::new(),
            public: false,
            decorators: Vec::new(),
        }
    }
}

impl fmt::Debug for ResolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMethod")
            .field("name", &self.name)
            .field("query", &self.query)
            .field("mutation", &self.mutation)
            .field("args", &self.args)
            .field("guards", &self.guards)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ResolverMethod`].
pub struct ResolverMethodBuilder {
    name: String,
    query: Option<QueryDescriptor>,
    mutation: Option<MutationDescriptor>,
    args: Vec<ArgDescriptor>,
    guards: Vec<GuardRef>,
    roles: Vec<String>,
    public: bool,
    decorators: Vec<Decorator>,
}

impl ResolverMethodBuilder {
    #[must_use]
    pub fn query(mut self, query: QueryDescriptor) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn mutation(mut self, mutation: MutationDescriptor) -> Self {
        self.mutation = Some(mutation);
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: ArgDescriptor) -> Self {
        self.args.push(arg);
        self
    }

    #[must_use]
    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.guards.push(guard);
        self
    }

    #[must_use]
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    #[must_use]
    pub fn decorate(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn handler(self, handler: MethodHandler) -> ResolverMethod {
        ResolverMethod {
            name: self.name,
            query: self.query,
            mutation: self.mutation,
            args: self.args,
            guards: self.guards,
            roles: self.roles,
            public: self.public,
            decorators: self.decorators,
            handler,
        }
    }
}

/// Metadata of one resolver class.
#[derive(Debug, Clone)]
pub struct ResolverMeta {
    pub class: ClassRef,
    pub descriptor: ResolverDescriptor,
    pub guards: Vec<GuardRef>,
    pub roles: Vec<String>,
    pub public: bool,
    pub methods: Vec<Arc<ResolverMethod>>,
}

impl ResolverMeta {
    #[must_use]
    pub fn builder(class: ClassRef) -> ResolverBuilder {
        let name = class.name().to_string();
        ResolverBuilder {
            meta: ResolverMeta {
                class,
                descriptor: ResolverDescriptor { name },
                guards: Vec::new(),
                roles: Vec::new(),
                public: false,
                methods: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.class.key()
    }
}

/// Builder for [`ResolverMeta`].
pub struct ResolverBuilder {
    meta: ResolverMeta,
}

impl ResolverBuilder {
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.meta.descriptor.name = name.to_string();
        self
    }

    #[must_use]
    pub fn guard(mut self, guard: GuardRef) -> Self {
        self.meta.guards.push(guard);
        self
    }

    #[must_use]
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.meta.public = true;
        self
    }

    #[must_use]
    pub fn method(mut self, method: ResolverMethod) -> Self {
        self.meta.methods.push(Arc::new(method));
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<ResolverMeta> {
        Arc::new(self.meta)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::class::ClassMeta;
    use crate::handler::method_fn;

    struct User;
    struct UsersResolver;

    #[test]
    fn thunks_are_evaluated_on_demand() {
        let field = FieldDescriptor::new("friends", || TypeRef::list(TypeRef::class::<User>()));
        assert_eq!(
            field.type_ref(),
            TypeRef::List(Box::new(TypeRef::Class(TypeKey::of::<User>())))
        );
        assert_eq!(FieldDescriptor::untyped("x").type_ref(), TypeRef::String);
    }

    #[test]
    fn resolver_builder_defaults_name_to_class() {
        let class = ClassMeta::unit::<UsersResolver>("UsersResolver", || UsersResolver);
        let meta = ResolverMeta::builder(class)
            .method(
                ResolverMethod::builder("users")
                    .query(QueryDescriptor::new(|| TypeRef::list(TypeRef::class::<User>())))
                    .arg(ArgDescriptor::named(0, "limit", || TypeRef::Int).nullable())
                    .arg(ArgDescriptor::current_user(1))
                    .handler(method_fn(|_: Arc<UsersResolver>, _| async {
                        Ok(Some(json!([])))
                    })),
            )
            .build();

        assert_eq!(meta.descriptor.name, "UsersResolver");
        assert_eq!(meta.key(), TypeKey::of::<UsersResolver>());
        let method = &meta.methods[0];
        assert!(method.query.is_some());
        assert!(method.mutation.is_none());
        assert!(method.args[0].nullable);
        assert!(method.args[1].is_current_user);
    }

    #[test]
    fn args_kind_counts_as_input() {
        assert!(ObjectTypeMeta::args::<User>("UserArgs").is_input());
        assert!(!ObjectTypeMeta::object::<User>("User").is_input());
    }
}

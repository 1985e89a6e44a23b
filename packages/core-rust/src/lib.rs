//! Trellis Core: tokens, class metadata, provider/module/route/GraphQL
//! descriptors, and the request primitives shared by the kernel and its
//! clients.

pub mod args;
pub mod class;
pub mod error;
pub mod graphql;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod module;
pub mod provider;
pub mod registry;
pub mod route;
pub mod schema;
pub mod token;
pub mod traits;
pub mod types;

pub use args::{Arg, Args};
pub use class::{ClassMeta, ClassRef, CtorParam, Instance, ParamType, Primitive, ResolvedDeps};
pub use error::{FieldViolation, KernelError};
pub use graphql::{
    ArgDescriptor, FieldDescriptor, MutationDescriptor, ObjectKind, ObjectTypeMeta,
    QueryDescriptor, ResolverDescriptor, ResolverMeta, ResolverMethod, TypeRef, TypeThunk,
};
pub use handler::{method_fn, BoxHandler, Decorator, Invocation, MethodHandler, MethodService};
pub use http::{HttpMethod, HttpRequest, ResponseBody, ResponseHandle, ResponseState};
pub use middleware::{MiddlewareBinding, MiddlewareConsumer, RouteInfo};
pub use module::{ModuleDescriptor, ModuleImport};
pub use provider::{ProviderDescriptor, ProviderKind, ProviderSpec};
pub use registry::MetadataRegistry;
pub use route::{ControllerMeta, MethodMeta, ParamBinding, ParamSource, RouteDescriptor};
pub use schema::{DtoType, FieldDef, FieldKind, ValidationResult};
pub use token::{Symbol, Token, TypeKey};
pub use traits::{
    ConfigureMiddleware, ExecutionContext, Guard, GuardRef, HandlerInfo, HandlerKind,
    Middleware, TokenVerifier,
};
pub use types::{Principal, Reply};

//! Controller, route and parameter descriptors for the REST surface.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;

use crate::class::ClassRef;
use crate::handler::{Decorator, MethodHandler};
use crate::http::HttpMethod;
use crate::schema::DtoType;
use crate::traits::GuardRef;

/// One `(method, path)` pair attached to a controller method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub method: HttpMethod,
    pub path: String,
}

/// Where a handler parameter takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    Body,
    Query,
    Param,
    Headers,
    Request,
    /// The response handle. With `passthrough` the kernel writes the raw
    /// return value instead of the success envelope.
    Response { passthrough: bool },
    /// The principal bound by the authentication guard.
    User,
}

/// Binding of one handler parameter.
#[derive(Debug, Clone)]
pub struct ParamBinding {
    pub index: usize,
    pub source: ParamSource,
    pub key: Option<String>,
    /// Declared payload class for keyless body/query parameters.
    pub dto: Option<DtoType>,
}

impl ParamBinding {
    #[must_use]
    pub fn new(index: usize, source: ParamSource) -> Self {
        Self {
            index,
            source,
            key: None,
            dto: None,
        }
    }

    #[must_use]
    pub fn body(index: usize) -> Self {
        Self::new(index, ParamSource::Body)
    }

    #[must_use]
    pub fn query(index: usize) -> Self {
        Self::new(index, ParamSource::Query)
    }

    /// Path parameter by name.
    #[must_use]
    pub fn param(index: usize, key: &str) -> Self {
        Self::new(index, ParamSource::Param).key(key)
    }

    #[must_use]
    pub fn headers(index: usize) -> Self {
        Self::new(index, ParamSource::Headers)
    }

    #[must_use]
    pub fn request(index: usize) -> Self {
        Self::new(index, ParamSource::Request)
    }

    #[must_use]
    pub fn response(index: usize, passthrough: bool) -> Self {
        Self::new(index, ParamSource::Response { passthrough })
    }

    #[must_use]
    pub fn user(index: usize) -> Self {
        Self::new(index, ParamSource::User)
    }

    #[must_use]
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    #[must_use]
    pub fn dto(mut self, dto: DtoType) -> Self {
        self.dto = Some(dto);
        self
    }

    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self.source, ParamSource::Response { passthrough: true })
    }
}

// ---------------------------------------------------------------------------
// MethodMeta
// ---------------------------------------------------------------------------

/// Metadata of one controller method.
#[derive(Clone)]
pub struct MethodMeta {
    pub name: String,
    pub routes: Vec<RouteDescriptor>,
    pub params: Vec<ParamBinding>,
    pub guards: Vec<GuardRef>,
    pub roles: Vec<String>,
    pub public: bool,
    /// Success status for the envelope; 200 when unset.
    pub status: Option<StatusCode>,
    pub decorators: Vec<Decorator>,
    pub handler: MethodHandler,
}

impl MethodMeta {
    pub fn builder(name: impl Into<String>) -> MethodBuilder {
        MethodBuilder {
            name: name.into(),
            routes: Vec::new(),
            params: Vec::new(),
            guards: Vec::new(),
            roles: Vec::new(),
            public: false,
            status: None,
            decorators: Vec::new(),
        }
    }
}

impl fmt::Debug for MethodMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodMeta")
            .field("name", &self.name)
            .field("routes", &self.routes)
            .field("params", &self.params)
            .field("guards", &self.guards)
            .field("decorators", &self.decorators)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MethodMeta`].
pub struct MethodBuilder {
    name: String,
    routes: Vec<RouteDescriptor>,
    params: Vec<ParamBinding>,
    guards: Vec<GuardRef>,
    roles: Vec<String>,
    public: bool,
    status: Option<StatusCode>,
    decorators: Vec<Decorator>,
}

impl MethodBuilder {
    #[must_use]
    pub fn route(mut self, method: HttpMethod, path: &str) -> Self {
        self.routes.push(RouteDescriptor {
            method,
            path: path.to_string(),
        });
        self
    }

    #[must_use]
    pub fn get(self, path: &str) -> Self {
        self.route(HttpMethod::Get, path)
    }

    #[must_use]
    pub fn post(self, path: &str) -> Self {
        self.route(HttpMethod::Post, path)
    }

    #[must_use]
    pub fn put(self, path: &str) -> Self {
        self.route(HttpMethod::Put, path)
    }

    #[must_use]
    pub fn patch(self, path: &str) -> Self {
        self.route(HttpMethod::Patch, path)
    }

    #[must_use]
    pub fn delete(self, path: &str) -> Self {
        self.route(HttpMethod::Delete, path)
    }

    #[must_use]
    pub fn param(mut self, binding: ParamBinding) -> Self {
        self.params.push(binding);
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
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn decorate(mut self, decorator: Decorator) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn handler(self, handler: MethodHandler) -> MethodMeta {
        MethodMeta {
            name: self.name,
            routes: self.routes,
            params: self.params,
            guards: self.guards,
            roles: self.roles,
            public: self.public,
            status: self.status,
            decorators: self.decorators,
            handler,
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerMeta
// ---------------------------------------------------------------------------

/// Metadata of one controller class.
#[derive(Debug, Clone)]
pub struct ControllerMeta {
    pub class: ClassRef,
    pub base_path: String,
    pub guards: Vec<GuardRef>,
    pub roles: Vec<String>,
    pub public: bool,
    pub methods: Vec<Arc<MethodMeta>>,
}

impl ControllerMeta {
    #[must_use]
    pub fn builder(class: ClassRef, base_path: &str) -> ControllerBuilder {
        ControllerBuilder {
            meta: ControllerMeta {
                class,
                base_path: base_path.to_string(),
                guards: Vec::new(),
                roles: Vec::new(),
                public: false,
                methods: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.class.name()
    }
}

/// Builder for [`ControllerMeta`].
pub struct ControllerBuilder {
    meta: ControllerMeta,
}

impl ControllerBuilder {
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
    pub fn method(mut self, method: MethodMeta) -> Self {
        self.meta.methods.push(Arc::new(method));
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<ControllerMeta> {
        Arc::new(self.meta)
    }
}

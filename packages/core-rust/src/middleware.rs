//! Middleware registration façade handed to module middleware hooks.

use std::fmt;
use std::sync::Arc;

use crate::http::HttpMethod;
use crate::traits::Middleware;

/// A route pattern a middleware applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub path: String,
    /// `None` matches every method.
    pub method: Option<HttpMethod>,
}

impl RouteInfo {
    #[must_use]
    pub fn any(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: None,
        }
    }

    #[must_use]
    pub fn method(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Some(method).filter(|m| *m != HttpMethod::All),
        }
    }
}

impl From<&str> for RouteInfo {
    fn from(path: &str) -> Self {
        Self::any(path)
    }
}

impl From<String> for RouteInfo {
    fn from(path: String) -> Self {
        Self::any(path)
    }
}

/// Middleware chain bound to a set of routes.
#[derive(Clone)]
pub struct MiddlewareBinding {
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub routes: Vec<RouteInfo>,
    pub exclude: Vec<RouteInfo>,
}

impl fmt::Debug for MiddlewareBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareBinding")
            .field("middleware", &self.middleware.len())
            .field("routes", &self.routes)
            .field("exclude", &self.exclude)
            .finish()
    }
}

/// Collects middleware bindings declared by a module.
#[derive(Debug, Default)]
pub struct MiddlewareConsumer {
    bindings: Vec<MiddlewareBinding>,
}

impl MiddlewareConsumer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a binding for one or more middleware, applied in order.
    pub fn apply<I>(&mut self, middleware: I) -> MiddlewareBuilder<'_>
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        MiddlewareBuilder {
            consumer: self,
            middleware: middleware.into_iter().collect(),
            exclude: Vec::new(),
        }
    }

    #[must_use]
    pub fn bindings(&self) -> &[MiddlewareBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn into_bindings(self) -> Vec<MiddlewareBinding> {
        self.bindings
    }
}

/// In-progress binding returned by [`MiddlewareConsumer::apply`].
pub struct MiddlewareBuilder<'a> {
    consumer: &'a mut MiddlewareConsumer,
    middleware: Vec<Arc<dyn Middleware>>,
    exclude: Vec<RouteInfo>,
}

impl MiddlewareBuilder<'_> {
    #[must_use]
    pub fn exclude<I, R>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RouteInfo>,
    {
        self.exclude.extend(routes.into_iter().map(Into::into));
        self
    }

    /// Finishes the binding for the given route patterns.
    pub fn for_routes<I, R>(self, routes: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<RouteInfo>,
    {
        let routes = routes.into_iter().map(Into::into).collect();
        self.consumer.bindings.push(MiddlewareBinding {
            middleware: self.middleware,
            routes,
            exclude: self.exclude,
        });
    }

    /// Finishes the binding for every route.
    pub fn for_all(self) {
        self.for_routes(["/"]);
    }
}

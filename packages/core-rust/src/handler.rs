//! Handler invocation types and named decorators.
//!
//! A method handler is exposed as a `tower::Service<Invocation>`. Decorators
//! such as metrics, caching, circuit breaking and queue offload are tower
//! layers composed around that service once, at registration time.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::anyhow;
use futures_util::future::BoxFuture;
use tower::util::BoxCloneService;
use tower::{Layer, Service};

use crate::args::Args;
use crate::class::Instance;
use crate::error::KernelError;
use crate::types::Reply;

/// One call of a controller or resolver method.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The resolved controller/resolver instance.
    pub target: Instance,
    pub args: Args,
    pub class_name: Arc<str>,
    pub method_name: Arc<str>,
}

impl Invocation {
    #[must_use]
    pub fn new(target: Instance, args: Args, class_name: &str, method_name: &str) -> Self {
        Self {
            target,
            args,
            class_name: Arc::from(class_name),
            method_name: Arc::from(method_name),
        }
    }

    /// `Class.method`, the name decorators report and key state by.
    #[must_use]
    pub fn handler_id(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<Reply, KernelError>>;

/// Type-erased method body.
pub type MethodHandler = Arc<dyn Fn(Instance, Args) -> HandlerFuture + Send + Sync>;

/// The composed, cloneable handler service.
pub type BoxHandler = BoxCloneService<Invocation, Reply, KernelError>;

/// Wraps a typed method body `f(&T, args)` into a [`MethodHandler`].
pub fn method_fn<T, F, Fut>(f: F) -> MethodHandler
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, KernelError>> + Send + 'static,
{
    Arc::new(move |target: Instance, args: Args| -> HandlerFuture {
        match target.downcast::<T>() {
            Ok(target) => Box::pin(f(target, args)),
            Err(_) => Box::pin(async {
                Err(KernelError::Internal(anyhow!(
                    "handler target is not a {}",
                    std::any::type_name::<T>()
                )))
            }),
        }
    })
}

// ---------------------------------------------------------------------------
// MethodService
// ---------------------------------------------------------------------------

/// Innermost service: calls the method body.
#[derive(Clone)]
pub struct MethodService {
    handler: MethodHandler,
}

impl MethodService {
    #[must_use]
    pub fn new(handler: MethodHandler) -> Self {
        Self { handler }
    }

    #[must_use]
    pub fn boxed(handler: MethodHandler) -> BoxHandler {
        BoxCloneService::new(Self::new(handler))
    }
}

impl Service<Invocation> for MethodService {
    type Response = Reply;
    type Error = KernelError;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        (self.handler)(inv.target, inv.args)
    }
}

// ---------------------------------------------------------------------------
// Decorator
// ---------------------------------------------------------------------------

type ApplyFn = Arc<dyn Fn(BoxHandler) -> BoxHandler + Send + Sync>;

/// A named wrapper applied around a method handler.
#[derive(Clone)]
pub struct Decorator {
    name: Cow<'static, str>,
    apply: ApplyFn,
}

impl Decorator {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
    where
        F: Fn(BoxHandler) -> BoxHandler + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// Decorator from any tower layer over handler services.
    pub fn layer<L>(name: impl Into<Cow<'static, str>>, layer: L) -> Self
    where
        L: Layer<BoxHandler> + Send + Sync + 'static,
        L::Service: Service<Invocation, Response = Reply, Error = KernelError> + Clone + Send + 'static,
        <L::Service as Service<Invocation>>::Future: Send + 'static,
    {
        Self::new(name, move |inner| BoxCloneService::new(layer.layer(inner)))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn apply(&self, inner: BoxHandler) -> BoxHandler {
        (self.apply)(inner)
    }
}

impl fmt::Debug for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Decorator").field(&self.name).finish()
    }
}

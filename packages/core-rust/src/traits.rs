use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::class::{ClassRef, Instance};
use crate::error::KernelError;
use crate::http::{HttpRequest, ResponseHandle};
use crate::middleware::MiddlewareConsumer;
use crate::types::Principal;

/// Which surface a handler is exposed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Rest,
    GraphQL,
}

/// Static facts about the handler a request is about to reach.
#[derive(Debug, Clone)]
pub struct HandlerInfo {
    pub class_name: String,
    pub method_name: String,
    pub kind: HandlerKind,
    /// Effective roles: method-level roles override class-level roles.
    pub roles: Vec<String>,
    /// Public handlers do not require authentication.
    pub public: bool,
}

/// Context handed to each guard in the chain.
pub struct ExecutionContext<'a> {
    pub request: &'a mut HttpRequest,
    /// `None` for GraphQL field resolution.
    pub response: Option<&'a ResponseHandle>,
    pub handler: &'a HandlerInfo,
}

/// Decides whether a request may reach its handler.
#[async_trait]
pub trait Guard: Send + Sync {
    /// `Ok(())` lets the request continue; an error aborts the chain.
    async fn can_activate(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), KernelError>;
}

/// Verifies bearer credentials for the built-in authentication guard.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, KernelError>;
}

/// Per-request middleware installed through a module's middleware hook.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Runs before the route handler. Writing the response ends the request.
    async fn handle(&self, req: &mut HttpRequest, res: &ResponseHandle) -> Result<(), KernelError>;
}

/// Implemented by module classes that configure request middleware.
pub trait ConfigureMiddleware: Send + Sync {
    fn configure(&self, consumer: &mut MiddlewareConsumer);
}

// ---------------------------------------------------------------------------
// GuardRef
// ---------------------------------------------------------------------------

/// A guard class plus the typed cast from its container instance.
#[derive(Clone)]
pub struct GuardRef {
    class: ClassRef,
    cast: fn(Instance) -> Option<Arc<dyn Guard>>,
}

impl GuardRef {
    /// Guard class `G` described by `class`.
    #[must_use]
    pub fn of<G: Guard + 'static>(class: ClassRef) -> Self {
        debug_assert_eq!(class.key(), crate::token::TypeKey::of::<G>());
        Self {
            class,
            cast: cast_guard::<G>,
        }
    }

    #[must_use]
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Views a resolved instance as a guard.
    #[must_use]
    pub fn cast(&self, instance: Instance) -> Option<Arc<dyn Guard>> {
        (self.cast)(instance)
    }
}

impl fmt::Debug for GuardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GuardRef").field(&self.class.name()).finish()
    }
}

fn cast_guard<G: Guard + 'static>(instance: Instance) -> Option<Arc<dyn Guard>> {
    instance.downcast::<G>().ok().map(|g| g as Arc<dyn Guard>)
}

pub(crate) fn cast_configurer<M: ConfigureMiddleware + 'static>(
    instance: Instance,
) -> Option<Arc<dyn ConfigureMiddleware>> {
    instance
        .downcast::<M>()
        .ok()
        .map(|m| m as Arc<dyn ConfigureMiddleware>)
}

//! Handler composition: wraps a method body with its decorators once, at
//! registration time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use trellis_core::handler::{BoxHandler, Decorator, MethodHandler, MethodService};

use super::cache::CacheLayer;
use super::circuit_breaker::{Breaker, CircuitBreakerConfig, CircuitBreakerLayer};
use super::metrics::{HandlerStats, MetricsLayer};
use super::offload::OffloadLayer;

/// Builds the handler service for one method.
///
/// The first decorator in `decorators` ends up outermost, so it sees the
/// invocation first and the reply last.
#[must_use]
pub fn compose(handler: MethodHandler, decorators: &[Decorator]) -> BoxHandler {
    decorators
        .iter()
        .rev()
        .fold(MethodService::boxed(handler), |inner, decorator| {
            decorator.apply(inner)
        })
}

/// A composed handler shared by every request that reaches one route or
/// field. Each call works on its own clone of the service.
pub struct SharedHandler {
    inner: Mutex<BoxHandler>,
}

impl SharedHandler {
    #[must_use]
    pub fn new(handler: BoxHandler) -> Self {
        Self {
            inner: Mutex::new(handler),
        }
    }

    /// Composes `handler` with `decorators`; see [`compose`].
    #[must_use]
    pub fn compose(handler: MethodHandler, decorators: &[Decorator]) -> Self {
        Self::new(compose(handler, decorators))
    }

    #[must_use]
    pub fn service(&self) -> BoxHandler {
        self.inner.lock().clone()
    }
}

/// Counts calls and spans each one, keeping the counters private.
#[must_use]
pub fn metrics() -> Decorator {
    metrics_into(HandlerStats::new())
}

/// Counts calls into `stats`.
#[must_use]
pub fn metrics_into(stats: Arc<HandlerStats>) -> Decorator {
    Decorator::layer("metrics", MetricsLayer::new(stats))
}

/// Fails fast once the handler keeps returning server errors.
#[must_use]
pub fn circuit_breaker(config: CircuitBreakerConfig) -> Decorator {
    circuit_breaker_with(Breaker::new(config))
}

/// Circuit breaker over caller-held state, e.g. to inspect or share it.
#[must_use]
pub fn circuit_breaker_with(breaker: Arc<Breaker>) -> Decorator {
    Decorator::layer("circuit_breaker", CircuitBreakerLayer::new(breaker))
}

/// Runs the handler as a background job and replies at once.
#[must_use]
pub fn offload(workers: usize, capacity: usize) -> Decorator {
    Decorator::layer("offload", OffloadLayer::new(workers, capacity))
}

/// Caches replies for `ttl`, keeping at most `capacity` entries.
#[must_use]
pub fn cache(ttl: Duration, capacity: usize) -> Decorator {
    Decorator::layer("cache", CacheLayer::new(ttl, capacity))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Per-handler call statistics.
//!
//! Every decorated handler owns a [`HandlerStats`] that counts calls by
//! outcome class. Each call also runs inside a `handler` span carrying the
//! `Class.method` id and the resulting status.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument};
use trellis_core::error::KernelError;
use trellis_core::handler::Invocation;
use trellis_core::types::Reply;

// ---------------------------------------------------------------------------
// HandlerStats
// ---------------------------------------------------------------------------

/// Counters for one handler. Shared by every clone of the decorated service.
#[derive(Debug, Default)]
pub struct HandlerStats {
    calls: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    total_micros: AtomicU64,
}

/// Point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub calls: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub total_micros: u64,
}

impl HandlerStats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &Result<Reply, KernelError>, micros: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        if let Err(err) = result {
            if err.status().is_server_error() {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            } else {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    stats: Arc<HandlerStats>,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(stats: Arc<HandlerStats>) -> Self {
        Self { stats }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            stats: Arc::clone(&self.stats),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    stats: Arc<HandlerStats>,
}

impl<S> Service<Invocation> for MetricsService<S>
where
    S: Service<Invocation, Response = Reply, Error = KernelError> + Send,
    S::Future: Send + 'static,
{
    type Response = Reply;
    type Error = KernelError;
    type Future = Pin<Box<dyn Future<Output = Result<Reply, KernelError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, inv: Invocation) -> Self::Future {
        let span = info_span!(
            "handler",
            id = %inv.handler_id(),
            status = tracing::field::Empty,
        );
        let stats = Arc::clone(&self.stats);
        let fut = self.inner.call(inv);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
                stats.record(&result, micros);

                let status = result.as_ref().map_or_else(|err| err.status().as_u16(), |_| 200);
                tracing::Span::current().record("status", status);
                debug!(micros, status, "handler complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

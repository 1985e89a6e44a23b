//! Circuit breaker decorator.
//!
//! Server-side failures (5xx) open the circuit after `failure_threshold`
//! consecutive occurrences. While open, calls fail fast with
//! `KernelError::CircuitOpen`. After `recovery_timeout` a limited number of
//! trial calls go through; `success_threshold` successes close the circuit
//! again and any failure reopens it. Client errors never trip the breaker.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tower::{Layer, Service};
use tracing::{info, warn};
use trellis_core::error::KernelError;
use trellis_core::handler::Invocation;
use trellis_core::types::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open { .. } => f.write_str("open"),
            Self::HalfOpen => f.write_str("half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    /// Trial calls allowed in flight while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_requests: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Breaker state machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
}

/// Shared breaker state for one handler.
#[derive(Debug)]
pub struct Breaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl Breaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                half_open_in_flight: 0,
            }),
        })
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns `true` when a call may proceed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() < self.config.recovery_timeout {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.half_open_in_flight = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_requests {
                    return false;
                }
                inner.half_open_in_flight += 1;
                true
            }
        }
    }

    fn complete(&self, handler: &str, failed: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                if !failed {
                    inner.consecutive_failures = 0;
                    return;
                }
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(handler, failures = inner.consecutive_failures, "circuit opened");
                    inner.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                if failed {
                    warn!(handler, "trial call failed, circuit reopened");
                    inner.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    return;
                }
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    info!(handler, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                }
            }
            // A call admitted before the circuit opened.
            CircuitState::Open { .. } => {}
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerLayer {
    breaker: Arc<Breaker>,
}

impl CircuitBreakerLayer {
    #[must_use]
    pub fn new(breaker: Arc<Breaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerService<S> {
    inner: S,
    breaker: Arc<Breaker>,
}

impl<S> Service<Invocation> for CircuitBreakerService<S>
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
        let handler = inv.handler_id();
        if !self.breaker.admit() {
            return Box::pin(async move { Err(KernelError::CircuitOpen { handler }) });
        }

        let breaker = Arc::clone(&self.breaker);
        let fut = self.inner.call(inv);
        Box::pin(async move {
            let result = fut.await;
            let failed = matches!(&result, Err(err) if err.status().is_server_error());
            breaker.complete(&handler, failed);
            result
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;
    use tower::ServiceExt;
    use trellis_core::args::Args;
    use trellis_core::handler::{method_fn, BoxHandler, MethodService};

    use super::*;

    struct Payments;

    struct Upstream {
        healthy: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    fn upstream() -> Upstream {
        Upstream {
            healthy: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn charge(upstream: &Upstream) -> BoxHandler {
        let healthy = Arc::clone(&upstream.healthy);
        let calls = Arc::clone(&upstream.calls);
        MethodService::boxed(method_fn(move |_: Arc<Payments>, _| {
            let healthy = healthy.load(Ordering::SeqCst);
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if healthy {
                    Ok(Some(json!("charged")))
                } else {
                    Err(KernelError::from(anyhow::anyhow!("gateway down")))
                }
            }
        }))
    }

    fn inv() -> Invocation {
        Invocation::new(Arc::new(Payments), Args::new(), "Payments", "charge")
    }

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(30),
            success_threshold: 2,
            half_open_max_requests: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_server_errors() {
        let upstream = upstream();
        let breaker = Breaker::new(config());
        let svc = CircuitBreakerLayer::new(Arc::clone(&breaker)).layer(charge(&upstream));

        for _ in 0..3 {
            svc.clone().oneshot(inv()).await.unwrap_err();
        }
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));

        let err = svc.oneshot(inv()).await.unwrap_err();
        assert!(matches!(&err, KernelError::CircuitOpen { handler } if handler == "Payments.charge"));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_do_not_trip_the_breaker() {
        let breaker = Breaker::new(config());
        let svc = CircuitBreakerLayer::new(Arc::clone(&breaker)).layer(MethodService::boxed(method_fn(
            |_: Arc<Payments>, _| async { Err::<Reply, _>(KernelError::bad_request("card declined")) },
        )));

        for _ in 0..5 {
            let err = svc.clone().oneshot(inv()).await.unwrap_err();
            assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open_trials() {
        let upstream = upstream();
        let breaker = Breaker::new(config());
        let svc = CircuitBreakerLayer::new(Arc::clone(&breaker)).layer(charge(&upstream));

        for _ in 0..3 {
            svc.clone().oneshot(inv()).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        upstream.healthy.store(true, Ordering::SeqCst);

        assert_eq!(svc.clone().oneshot(inv()).await.unwrap(), Some(json!("charged")));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        svc.oneshot(inv()).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_trial_reopens() {
        let upstream = upstream();
        let breaker = Breaker::new(config());
        let svc = CircuitBreakerLayer::new(Arc::clone(&breaker)).layer(charge(&upstream));

        for _ in 0..3 {
            svc.clone().oneshot(inv()).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = svc.clone().oneshot(inv()).await.unwrap_err();
        assert!(matches!(err, KernelError::Internal(_)));
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn half_open_limits_trial_calls() {
        let breaker = Breaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::ZERO,
            ..config()
        });
        assert!(breaker.admit());
        breaker.complete("Payments.charge", true);

        assert!(breaker.admit());
        assert!(!breaker.admit());
        breaker.complete("Payments.charge", false);
        assert!(breaker.admit());
    }
}

//! Response cache decorator.
//!
//! Caches replies per `(class, method, arguments)` for a fixed TTL. Calls
//! that bind the raw request or response are never cached.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use quick_cache::sync::Cache;
use tower::{Layer, Service};
use tracing::trace;
use trellis_core::error::KernelError;
use trellis_core::handler::Invocation;
use trellis_core::types::Reply;

type ReplyCache = Cache<String, (Instant, Reply)>;

// ---------------------------------------------------------------------------
// CacheLayer
// ---------------------------------------------------------------------------

/// Tower layer holding one reply cache shared by every clone of the
/// wrapped service.
#[derive(Clone)]
pub struct CacheLayer {
    cache: Arc<ReplyCache>,
    ttl: Duration,
}

impl CacheLayer {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            cache: Arc::new(Cache::new(capacity)),
            ttl,
        }
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    cache: Arc<ReplyCache>,
    ttl: Duration,
}

fn cache_key(inv: &Invocation) -> String {
    format!(
        "{}.{}:{}",
        inv.class_name,
        inv.method_name,
        inv.args.fingerprint()
    )
}

impl<S> Service<Invocation> for CacheService<S>
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
        if !inv.args.is_plain_data() {
            return Box::pin(self.inner.call(inv));
        }

        let key = cache_key(&inv);
        if let Some((stored_at, reply)) = self.cache.get(&key) {
            if stored_at.elapsed() < self.ttl {
                trace!(key = %key, "reply cache hit");
                return Box::pin(async move { Ok(reply) });
            }
            self.cache.remove(&key);
        }

        let cache = Arc::clone(&self.cache);
        let fut = self.inner.call(inv);
        Box::pin(async move {
            let reply = fut.await?;
            cache.insert(key, (Instant::now(), reply.clone()));
            Ok(reply)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Queue-offload decorator.
//!
//! Accepts the call, hands the handler body to a background tokio task and
//! replies immediately with an empty result. At most `capacity` jobs may be
//! queued or running; beyond that the call fails with
//! `KernelError::QueueFull`. `workers` bounds how many jobs run at once.
//! Job failures are logged, never returned to the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::{Layer, Service};
use tracing::{debug, warn};
use trellis_core::error::KernelError;
use trellis_core::handler::Invocation;
use trellis_core::types::Reply;

#[derive(Debug, Clone)]
pub struct OffloadLayer {
    slots: Arc<Semaphore>,
    workers: Arc<Semaphore>,
}

impl OffloadLayer {
    #[must_use]
    pub fn new(workers: usize, capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity.max(1))),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

impl<S> Layer<S> for OffloadLayer {
    type Service = OffloadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OffloadService {
            inner,
            slots: Arc::clone(&self.slots),
            workers: Arc::clone(&self.workers),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OffloadService<S> {
    inner: S,
    slots: Arc<Semaphore>,
    workers: Arc<Semaphore>,
}

impl<S> Service<Invocation> for OffloadService<S>
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
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            return Box::pin(async move { Err(KernelError::QueueFull { handler }) });
        };

        let workers = Arc::clone(&self.workers);
        let job = self.inner.call(inv);
        tokio::spawn(async move {
            let Ok(_worker) = workers.acquire_owned().await else {
                return;
            };
            match job.await {
                Ok(_) => debug!(%handler, "offloaded job finished"),
                Err(err) => warn!(%handler, error = %err, "offloaded job failed"),
            }
            drop(slot);
        });
        Box::pin(async { Ok(None) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::{mpsc, Notify};
    use tower::ServiceExt;
    use trellis_core::args::{Arg, Args};
    use trellis_core::handler::{method_fn, BoxHandler, MethodService};

    use super::*;

    struct Mailer;

    fn send_mail(gate: Arc<Notify>, sent: mpsc::UnboundedSender<String>) -> BoxHandler {
        MethodService::boxed(method_fn(move |_: Arc<Mailer>, args: Args| {
            let gate = Arc::clone(&gate);
            let sent = sent.clone();
            async move {
                gate.notified().await;
                let to: String = args.parse(0)?;
                let _ = sent.send(to);
                Ok(Some(json!("sent")))
            }
        }))
    }

    fn inv(to: &str) -> Invocation {
        Invocation::new(
            Arc::new(Mailer),
            Args::new().with(0, Arg::Value(json!(to))),
            "Mailer",
            "send",
        )
    }

    #[tokio::test]
    async fn replies_before_the_job_runs() {
        let gate = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let svc = OffloadLayer::new(1, 4).layer(send_mail(Arc::clone(&gate), tx));

        assert_eq!(svc.oneshot(inv("ada@example.com")).await.unwrap(), None);
        assert!(rx.try_recv().is_err());

        gate.notify_one();
        let sent = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(sent.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn full_queue_rejects_new_jobs() {
        let gate = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let svc = OffloadLayer::new(1, 2).layer(send_mail(Arc::clone(&gate), tx));

        svc.clone().oneshot(inv("a@example.com")).await.unwrap();
        svc.clone().oneshot(inv("b@example.com")).await.unwrap();
        let err = svc.clone().oneshot(inv("c@example.com")).await.unwrap_err();
        assert!(matches!(&err, KernelError::QueueFull { handler } if handler == "Mailer.send"));
        assert_eq!(err.status(), http::StatusCode::SERVICE_UNAVAILABLE);

        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();

        // Both slots are free again once the jobs finish.
        tokio::task::yield_now().await;
        let mut accepted = false;
        for _ in 0..50 {
            if svc.clone().oneshot(inv("d@example.com")).await.is_ok() {
                accepted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(accepted);
    }
}

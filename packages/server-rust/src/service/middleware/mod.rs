//! Tower layers used as handler decorators.
//!
//! - [`metrics`]: Per-handler call counters and `tracing` spans
//! - [`cache`]: TTL reply cache
//! - [`circuit_breaker`]: Fails fast after repeated server errors
//! - [`offload`]: Runs the handler as a background job
//! - [`pipeline`]: Composes decorators around a method body

pub mod cache;
pub mod circuit_breaker;
pub mod metrics;
pub mod offload;
pub mod pipeline;

pub use cache::CacheLayer;
pub use circuit_breaker::{Breaker, CircuitBreakerConfig, CircuitBreakerLayer, CircuitState};
pub use metrics::{HandlerStats, MetricsLayer, StatsSnapshot};
pub use offload::OffloadLayer;
pub use pipeline::{compose, SharedHandler};

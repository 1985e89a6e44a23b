//! HTTP hosting: the kernel's axum host adapter, the transport layer stack
//! and the listener lifecycle.

pub mod config;
pub mod host;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use host::{AxumHost, HttpHost};
pub use middleware::build_http_layers;
pub use module::NetworkModule;

//! Trellis Server: service container, module graph builder, REST route
//! registrar and request pipeline, GraphQL schema builder, served by axum.

pub mod app;
pub mod error;
pub mod graphql;
pub mod network;
pub mod routing;
pub mod service;

pub use app::Application;
pub use error::RegistrationError;
pub use graphql::{GraphQLRequest, GraphQLResponse, Schema};
pub use network::{AxumHost, HttpHost, NetworkConfig, NetworkModule};
pub use routing::{ErrorFilter, JwtVerifier, TOKEN_VERIFIER};
pub use service::{Container, ContainerError, KernelConfig};

/// Re-exported so applications depend on one crate for metadata types.
pub use trellis_core as core;

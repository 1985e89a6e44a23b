//! REST surface: path handling, parameter binding, guards, the per-request
//! pipeline, the route registrar and the global error filter.

pub mod binding;
pub mod filter;
pub mod guards;
pub mod path;
pub mod pipeline;
pub mod registrar;

pub use filter::ErrorFilter;
pub use guards::{AuthGuard, JwtVerifier, RolesGuard, TOKEN_VERIFIER};
pub use pipeline::RequestPipeline;
pub use registrar::RouteRegistrar;

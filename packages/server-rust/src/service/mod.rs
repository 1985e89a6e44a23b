//! Kernel services: the container, the module graph builder, registries,
//! configuration, the route table and handler decorators.
//!
//! 1. **Container** (`container`): provider registration and singleton resolution
//! 2. **Modules** (`modules`): module graph walk and middleware wiring
//! 3. **Registries** (`registries`): controllers and resolvers found during the walk
//! 4. **Router** (`router`): the ordered route table behind the HTTP host
//! 5. **Middleware** (`middleware`): Tower layers used as handler decorators

pub mod config;
pub mod container;
pub mod middleware;
pub mod modules;
pub mod registries;
pub mod router;

pub use config::{AuthConfig, KernelConfig};
pub use container::{Container, ContainerError};
pub use modules::{configure_module_middleware, register_module, ModuleContext};
pub use registries::{ControllerRegistry, ResolverRegistry};
pub use router::{RouteHandler, RouteTable};

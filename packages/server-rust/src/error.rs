//! Bootstrap-time errors. All of them are fatal: the application does not
//! start in a partially registered state.

use crate::service::container::ContainerError;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("module {module} has no module metadata")]
    MissingModule { module: String },
    #[error("{class} is used as a controller but has no controller metadata")]
    MissingController { class: String },
    #[error("guard {guard} on {handler} did not resolve to a guard instance")]
    InvalidGuard { guard: String, handler: String },
    #[error("module {module} did not resolve to its own class")]
    InvalidModule { module: String },
    #[error("invalid GraphQL schema: {0}")]
    Schema(String),
    #[error(transparent)]
    Container(#[from] ContainerError),
}

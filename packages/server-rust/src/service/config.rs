/// Authentication settings for the built-in guards.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret for the default JWT verifier. When `None`, bearer
    /// tokens are rejected unless a custom verifier is registered.
    pub jwt_secret: Option<String>,
}

/// Kernel-level configuration for route installation, error shaping and
/// request handling.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Prefix prepended to every controller path (e.g. `/api`).
    pub global_prefix: String,
    /// Path the GraphQL schema is mounted at; `None` disables mounting.
    pub graphql_path: Option<String>,
    /// Production mode redacts messages of 5xx responses.
    pub production: bool,
    pub auth: AuthConfig,
    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            global_prefix: String::new(),
            graphql_path: Some("/graphql".to_string()),
            production: false,
            auth: AuthConfig::default(),
            body_limit: 1024 * 1024,
        }
    }
}

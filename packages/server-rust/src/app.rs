//! Application composition: runs the full bootstrap and hands out the
//! resulting router.

use std::sync::Arc;

use axum::Router;
use tracing::info;
use trellis_core::http::HttpMethod;
use trellis_core::module::ModuleImport;
use trellis_core::provider::ProviderDescriptor;
use trellis_core::registry::MetadataRegistry;
use trellis_core::traits::TokenVerifier;

use crate::error::RegistrationError;
use crate::graphql::{mount_graphql, Schema, SchemaBuilder};
use crate::network::host::AxumHost;
use crate::routing::filter::ErrorFilter;
use crate::routing::guards::{JwtVerifier, TOKEN_VERIFIER};
use crate::routing::path::normalize_path;
use crate::routing::registrar::RouteRegistrar;
use crate::service::config::KernelConfig;
use crate::service::container::Container;
use crate::service::modules::{configure_module_middleware, register_module, ModuleContext};

/// A bootstrapped application: every module registered, every route and
/// middleware installed, and the GraphQL schema built.
pub struct Application {
    container: Arc<Container>,
    schema: Arc<Schema>,
    host: AxumHost,
    config: KernelConfig,
}

impl Application {
    /// Runs the bootstrap sequence for `root`:
    ///
    /// 1. register the module graph
    /// 2. provide the default token verifier unless a module provided one
    /// 3. install controller routes
    /// 4. run module middleware hooks
    /// 5. build the GraphQL schema and mount it when a path is configured
    ///
    /// # Errors
    ///
    /// Any registration failure aborts the bootstrap.
    pub async fn bootstrap(
        registry: Arc<MetadataRegistry>,
        root: impl Into<ModuleImport>,
        config: KernelConfig,
    ) -> Result<Self, RegistrationError> {
        let root = root.into();
        let container = Arc::new(Container::new());
        let ctx = ModuleContext::new(Arc::clone(&container), Arc::clone(&registry));

        register_module(&root, &ctx).await?;

        if !container.has(&TOKEN_VERIFIER) {
            let verifier: Arc<dyn TokenVerifier> =
                Arc::new(JwtVerifier::new(config.auth.jwt_secret.clone()));
            container.register(ProviderDescriptor::value(TOKEN_VERIFIER, verifier))?;
        }

        let filter = ErrorFilter::new(config.production);
        let mut host = AxumHost::new(filter.clone(), config.body_limit);

        RouteRegistrar::new(
            Arc::clone(&container),
            Arc::clone(&ctx.controllers),
            filter,
            config.global_prefix.clone(),
        )
        .register_all(&mut host)?;

        configure_module_middleware(&root, &mut host, &ctx, &config.global_prefix).await?;

        let schema = Arc::new(
            SchemaBuilder::new(Arc::clone(&container), registry, Arc::clone(&ctx.resolvers)).build()?,
        );
        if let Some(path) = &config.graphql_path {
            let path = normalize_path([path]);
            if !mount_graphql(&mut host, &path, Arc::clone(&schema), config.production) {
                return Err(RegistrationError::Schema(format!(
                    "GraphQL path {path} collides with an installed route"
                )));
            }
        }

        info!(
            providers = container.tokens().len(),
            controllers = ctx.controllers.len(),
            resolvers = ctx.resolvers.len(),
            routes = host.routes().len(),
            "application bootstrapped"
        );
        Ok(Self {
            container,
            schema,
            host,
            config,
        })
    }

    #[must_use]
    pub fn container(&self) -> Arc<Container> {
        Arc::clone(&self.container)
    }

    #[must_use]
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Installed `(method, path)` pairs, GraphQL endpoints included.
    #[must_use]
    pub fn routes(&self) -> Vec<(HttpMethod, String)> {
        self.host.routes()
    }

    /// Freezes the application into an axum router.
    pub fn into_router(self) -> Router {
        self.host.into_router()
    }

    /// Drops every provider and singleton.
    pub fn shutdown(&self) {
        self.container.clear();
        info!("application shut down");
    }
}

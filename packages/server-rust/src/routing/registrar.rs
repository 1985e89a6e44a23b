//! Route registrar: turns controller metadata into installed routes.

use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, info, warn};
use trellis_core::http::{HttpRequest, ResponseHandle};
use trellis_core::route::{ControllerMeta, MethodMeta};
use trellis_core::traits::{HandlerInfo, HandlerKind};

use super::filter::ErrorFilter;
use super::path::{is_valid_path, normalize_path};
use super::pipeline::{effective_roles, resolve_guard_chain, RequestPipeline};
use crate::error::RegistrationError;
use crate::network::host::HttpHost;
use crate::service::container::Container;
use crate::service::middleware::SharedHandler;
use crate::service::registries::ControllerRegistry;
use crate::service::router::RouteHandler;

/// Installs every route of every registered controller on an [`HttpHost`].
pub struct RouteRegistrar {
    container: Arc<Container>,
    controllers: Arc<ControllerRegistry>,
    filter: ErrorFilter,
    global_prefix: String,
}

impl RouteRegistrar {
    #[must_use]
    pub fn new(
        container: Arc<Container>,
        controllers: Arc<ControllerRegistry>,
        filter: ErrorFilter,
        global_prefix: impl Into<String>,
    ) -> Self {
        Self {
            container,
            controllers,
            filter,
            global_prefix: global_prefix.into(),
        }
    }

    /// Installs all routes and returns how many were installed.
    ///
    /// Routes with an invalid full path are skipped with a warning, as are
    /// duplicates of an already installed `(method, path)` pair.
    ///
    /// # Errors
    ///
    /// Fails when a controller or one of its guards cannot be resolved.
    pub fn register_all(&self, host: &mut dyn HttpHost) -> Result<usize, RegistrationError> {
        let mut installed = 0;
        for controller in self.controllers.all() {
            installed += self.register_controller(&controller, host)?;
        }
        info!(routes = installed, "routes registered");
        Ok(installed)
    }

    fn register_controller(
        &self,
        controller: &ControllerMeta,
        host: &mut dyn HttpHost,
    ) -> Result<usize, RegistrationError> {
        let target = self.container.resolve(&controller.class.token())?;
        let mut installed = 0;

        for method in &controller.methods {
            let label = format!("{}.{}", controller.name(), method.name);
            let guards = resolve_guard_chain(&self.container, &controller.guards, &method.guards, &label)?;
            let info = handler_info(controller, method);

            for route in &method.routes {
                let path = normalize_path([
                    self.global_prefix.as_str(),
                    controller.base_path.as_str(),
                    route.path.as_str(),
                ]);
                if !is_valid_path(&path) {
                    warn!(handler = %label, path = %path, "skipping route with invalid path");
                    continue;
                }

                let pipeline = Arc::new(RequestPipeline::new(
                    Arc::clone(&target),
                    info.clone(),
                    guards.clone(),
                    method.params.clone(),
                    route.method,
                    method.status,
                    SharedHandler::compose(Arc::clone(&method.handler), &method.decorators),
                    self.filter.clone(),
                ));
                let handler: RouteHandler = Arc::new(move |req: HttpRequest, res: ResponseHandle| {
                    let pipeline = Arc::clone(&pipeline);
                    async move { pipeline.handle(req, res).await }.boxed()
                });

                if host.route(route.method, &path, handler) {
                    debug!(method = route.method.as_str(), path = %path, handler = %label, "route installed");
                    installed += 1;
                } else {
                    warn!(method = route.method.as_str(), path = %path, handler = %label, "duplicate route ignored");
                }
            }
        }
        Ok(installed)
    }
}

fn handler_info(controller: &ControllerMeta, method: &MethodMeta) -> HandlerInfo {
    HandlerInfo {
        class_name: controller.name().to_string(),
        method_name: method.name.clone(),
        kind: HandlerKind::Rest,
        roles: effective_roles(&controller.roles, &method.roles),
        public: controller.public || method.public,
    }
}

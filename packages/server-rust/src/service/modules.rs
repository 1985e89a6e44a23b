//! Module graph builder: walks module descriptors, registering providers and
//! controllers, and wires module-declared request middleware.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};
use trellis_core::class::ClassRef;
use trellis_core::middleware::{MiddlewareConsumer, RouteInfo};
use trellis_core::module::{ModuleDescriptor, ModuleImport};
use trellis_core::provider::{ProviderKind, ProviderSpec};
use trellis_core::registry::MetadataRegistry;
use trellis_core::token::TypeKey;

use crate::error::RegistrationError;
use crate::network::host::HttpHost;
use crate::routing::path::normalize_path;
use crate::service::container::Container;
use crate::service::registries::{ControllerRegistry, ResolverRegistry};

/// Identity of a module in the graph: class modules by type, dynamic
/// modules by descriptor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ModuleId {
    Class(TypeKey),
    Dynamic(u64),
}

fn module_id(module: &ModuleDescriptor) -> ModuleId {
    module
        .key
        .map_or_else(|| ModuleId::Dynamic(module.id()), ModuleId::Class)
}

/// Everything the builder reads from and writes into during bootstrap.
pub struct ModuleContext {
    pub container: Arc<Container>,
    pub registry: Arc<MetadataRegistry>,
    pub controllers: Arc<ControllerRegistry>,
    pub resolvers: Arc<ResolverRegistry>,
    visited: Mutex<HashSet<ModuleId>>,
}

impl ModuleContext {
    #[must_use]
    pub fn new(container: Arc<Container>, registry: Arc<MetadataRegistry>) -> Self {
        Self {
            container,
            registry,
            controllers: Arc::new(ControllerRegistry::new()),
            resolvers: Arc::new(ResolverRegistry::new()),
            visited: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `false` if the module was registered before.
    fn mark_visited(&self, module: &Arc<ModuleDescriptor>) -> bool {
        self.visited.lock().insert(module_id(module))
    }

    fn track_resolver(&self, class: &ClassRef) {
        if let Some(resolver) = self.registry.resolver(class.key()) {
            if self.resolvers.add(Arc::clone(resolver)) {
                debug!(resolver = %resolver.descriptor.name, "resolver discovered");
            }
        }
    }
}

async fn resolve_import(
    import: &ModuleImport,
    registry: &MetadataRegistry,
) -> Result<Arc<ModuleDescriptor>, RegistrationError> {
    match import {
        ModuleImport::Class(key) => {
            registry
                .module(*key)
                .cloned()
                .ok_or_else(|| RegistrationError::MissingModule {
                    module: key.short_name().to_string(),
                })
        }
        ModuleImport::Named(name) => {
            registry
                .module_by_name(name)
                .cloned()
                .ok_or_else(|| RegistrationError::MissingModule {
                    module: name.clone(),
                })
        }
        ModuleImport::Dynamic(module) => Ok(Arc::clone(module)),
        ModuleImport::Deferred(future) => Ok(future.clone().await),
    }
}

// ---------------------------------------------------------------------------
// Provider registration
// ---------------------------------------------------------------------------

/// Registers `import` and everything it imports, depth first.
///
/// A class module reached through several imports is registered once.
///
/// # Errors
///
/// Fails on the first module without metadata, controller without
/// controller metadata, or provider the container rejects.
pub async fn register_module(
    import: &ModuleImport,
    ctx: &ModuleContext,
) -> Result<(), RegistrationError> {
    let module = resolve_import(import, &ctx.registry).await?;
    register_descriptor(module, ctx).await
}

fn register_descriptor<'a>(
    module: Arc<ModuleDescriptor>,
    ctx: &'a ModuleContext,
) -> BoxFuture<'a, Result<(), RegistrationError>> {
    Box::pin(async move {
        if !ctx.mark_visited(&module) {
            return Ok(());
        }
        debug!(module = %module.name, global = module.global, "registering module");

        for provider in &module.providers {
            match provider {
                ProviderSpec::Class(class) => {
                    ctx.container.register_class(Arc::clone(class))?;
                    ctx.track_resolver(class);
                }
                ProviderSpec::Descriptor(descriptor) => {
                    ctx.container.register(descriptor.clone())?;
                    if let ProviderKind::Class(class) = &descriptor.kind {
                        ctx.track_resolver(class);
                    }
                }
            }
        }

        for class in &module.controllers {
            let meta = ctx.registry.controller(class.key()).ok_or_else(|| {
                RegistrationError::MissingController {
                    class: class.name().to_string(),
                }
            })?;
            ctx.container.register_class(Arc::clone(class))?;
            ctx.controllers.add(Arc::clone(meta));
        }

        if let Some(class) = &module.class {
            ctx.container.register_class(Arc::clone(class))?;
        }

        for import in &module.imports {
            let child = resolve_import(import, &ctx.registry).await?;
            register_descriptor(child, ctx).await?;
        }

        for token in &module.exports {
            if !ctx.container.has(token) {
                warn!(module = %module.name, %token, "exported token has no provider");
            }
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Middleware wiring
// ---------------------------------------------------------------------------

/// Runs every module's middleware hook, root first, and installs the
/// resulting bindings on `host` under `global_prefix`.
///
/// Call after [`register_module`]: each module class is resolved from the
/// container.
///
/// # Errors
///
/// Fails when an import has no metadata or a module class cannot be
/// resolved.
pub async fn configure_module_middleware(
    import: &ModuleImport,
    host: &mut dyn HttpHost,
    ctx: &ModuleContext,
    global_prefix: &str,
) -> Result<(), RegistrationError> {
    let module = resolve_import(import, &ctx.registry).await?;
    let mut seen = HashSet::new();
    configure_descriptor(module, host, ctx, global_prefix, &mut seen).await
}

fn configure_descriptor<'a>(
    module: Arc<ModuleDescriptor>,
    host: &'a mut dyn HttpHost,
    ctx: &'a ModuleContext,
    global_prefix: &'a str,
    seen: &'a mut HashSet<ModuleId>,
) -> BoxFuture<'a, Result<(), RegistrationError>> {
    Box::pin(async move {
        if !seen.insert(module_id(&module)) {
            return Ok(());
        }

        if let Some(class) = &module.class {
            let instance = ctx.container.resolve(&class.token())?;
            if let Some(cast) = module.middleware {
                let configurer = cast(instance).ok_or_else(|| RegistrationError::InvalidModule {
                    module: module.name.clone(),
                })?;
                let mut consumer = MiddlewareConsumer::new();
                configurer.configure(&mut consumer);
                for mut binding in consumer.into_bindings() {
                    binding.routes = prefixed(&binding.routes, global_prefix);
                    binding.exclude = prefixed(&binding.exclude, global_prefix);
                    host.use_middleware(binding);
                }
            }
        }

        for import in &module.imports {
            let child = resolve_import(import, &ctx.registry).await?;
            configure_descriptor(child, &mut *host, ctx, global_prefix, &mut *seen).await?;
        }
        Ok(())
    })
}

fn prefixed(routes: &[RouteInfo], global_prefix: &str) -> Vec<RouteInfo> {
    routes
        .iter()
        .map(|route| RouteInfo {
            path: normalize_path([global_prefix, route.path.as_str()]),
            method: route.method,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use trellis_core::class::ClassMeta;
    use trellis_core::error::KernelError;
    use trellis_core::graphql::{QueryDescriptor, ResolverMeta, ResolverMethod, TypeRef};
    use trellis_core::handler::method_fn;
    use trellis_core::http::{HttpMethod, HttpRequest, ResponseHandle};
    use trellis_core::middleware::MiddlewareBinding;
    use trellis_core::provider::ProviderDescriptor;
    use trellis_core::route::{ControllerMeta, MethodMeta};
    use trellis_core::token::Token;
    use trellis_core::traits::{ConfigureMiddleware, Middleware};

    use super::*;
    use crate::service::router::RouteHandler;

    struct UsersService;
    struct UsersController;
    struct UsersResolver;
    struct UsersModule;
    struct SharedModule;
    struct AppModule;

    struct Audit;

    #[async_trait]
    impl Middleware for Audit {
        async fn handle(&self, _req: &mut HttpRequest, _res: &ResponseHandle) -> Result<(), KernelError> {
            Ok(())
        }
    }

    impl ConfigureMiddleware for UsersModule {
        fn configure(&self, consumer: &mut MiddlewareConsumer) {
            consumer
                .apply([Arc::new(Audit) as Arc<dyn Middleware>])
                .exclude(["/users/health"])
                .for_routes([RouteInfo::method(HttpMethod::Post, "/users"), RouteInfo::any("users/:id")]);
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        bindings: Vec<MiddlewareBinding>,
    }

    impl HttpHost for RecordingHost {
        fn route(&mut self, _method: HttpMethod, _path: &str, _handler: RouteHandler) -> bool {
            true
        }

        fn use_middleware(&mut self, binding: MiddlewareBinding) {
            self.bindings.push(binding);
        }
    }

    fn users_controller() -> Arc<ControllerMeta> {
        ControllerMeta::builder(ClassMeta::unit::<UsersController>("UsersController", || UsersController), "/users")
            .method(
                MethodMeta::builder("list")
                    .get("/")
                    .handler(method_fn(|_: Arc<UsersController>, _| async { Ok(Some(json!([]))) })),
            )
            .build()
    }

    fn users_resolver() -> Arc<ResolverMeta> {
        ResolverMeta::builder(ClassMeta::unit::<UsersResolver>("UsersResolver", || UsersResolver))
            .method(
                ResolverMethod::builder("users")
                    .query(QueryDescriptor::new(|| TypeRef::list(TypeRef::String)))
                    .handler(method_fn(|_: Arc<UsersResolver>, _| async { Ok(Some(json!([]))) })),
            )
            .build()
    }

    fn registry(shared_builds: Arc<AtomicUsize>) -> Arc<MetadataRegistry> {
        let shared = ModuleDescriptor::builder(ClassMeta::unit::<SharedModule>("SharedModule", || SharedModule))
            .provider(ProviderDescriptor::factory(Token::name("CONFIG"), vec![], move |_| {
                shared_builds.fetch_add(1, Ordering::SeqCst);
                Ok(String::from("cfg"))
            }))
            .export(Token::name("CONFIG"))
            .build();
        let resolver = users_resolver();
        let users = ModuleDescriptor::builder(ClassMeta::unit::<UsersModule>("UsersModule", || UsersModule))
            .provider(ClassMeta::unit::<UsersService>("UsersService", || UsersService))
            .provider(Arc::clone(&resolver.class))
            .controller(Arc::clone(&users_controller().class))
            .import(ModuleImport::class::<SharedModule>())
            .export(Token::of::<UsersService>())
            .export(Token::name("MISSING"))
            .configure_middleware::<UsersModule>()
            .build();
        let app = ModuleDescriptor::builder(ClassMeta::unit::<AppModule>("AppModule", || AppModule))
            .import(ModuleImport::class::<UsersModule>())
            .import(ModuleImport::named("SharedModule"))
            .build();

        MetadataRegistry::builder()
            .module(shared)
            .module(users)
            .module(app)
            .controller(users_controller())
            .resolver(resolver)
            .build()
    }

    fn context(registry: Arc<MetadataRegistry>) -> ModuleContext {
        ModuleContext::new(Arc::new(Container::new()), registry)
    }

    #[tokio::test]
    async fn registers_providers_controllers_and_module_classes() {
        let ctx = context(registry(Arc::new(AtomicUsize::new(0))));
        register_module(&ModuleImport::class::<AppModule>(), &ctx).await.unwrap();

        assert!(ctx.container.has(&Token::of::<UsersService>()));
        assert!(ctx.container.has(&Token::of::<UsersController>()));
        assert!(ctx.container.has(&Token::of::<UsersModule>()));
        assert!(ctx.container.has(&Token::of::<AppModule>()));
        assert!(ctx.container.has(&Token::name("CONFIG")));
        assert_eq!(ctx.controllers.len(), 1);
        assert_eq!(ctx.resolvers.len(), 1);
    }

    #[tokio::test]
    async fn shared_import_is_registered_once() {
        let builds = Arc::new(AtomicUsize::new(0));
        let ctx = context(registry(Arc::clone(&builds)));
        register_module(&ModuleImport::class::<AppModule>(), &ctx).await.unwrap();
        assert_eq!(ctx.visited.lock().len(), 3);

        ctx.container.resolve(&Token::name("CONFIG")).unwrap();
        ctx.container.resolve(&Token::name("CONFIG")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_module_metadata_is_fatal() {
        struct Unknown;
        let ctx = context(registry(Arc::new(AtomicUsize::new(0))));
        let err = register_module(&ModuleImport::class::<Unknown>(), &ctx).await.unwrap_err();
        assert!(matches!(err, RegistrationError::MissingModule { .. }));

        let err = register_module(&ModuleImport::named("Nope"), &ctx).await.unwrap_err();
        assert!(matches!(err, RegistrationError::MissingModule { module } if module == "Nope"));
    }

    #[tokio::test]
    async fn controller_without_metadata_is_fatal() {
        struct Bare;
        let module = ModuleDescriptor::dynamic("Broken")
            .controller(ClassMeta::unit::<Bare>("Bare", || Bare))
            .build();
        let ctx = context(MetadataRegistry::builder().build());
        let err = register_module(&module.into(), &ctx).await.unwrap_err();
        assert!(matches!(err, RegistrationError::MissingController { class } if class == "Bare"));
    }

    #[tokio::test]
    async fn deferred_and_dynamic_imports_are_walked() {
        let lazy = ModuleDescriptor::dynamic("Lazy")
            .provider(ProviderDescriptor::value(Token::name("LAZY"), 1u8))
            .build();
        let root = ModuleDescriptor::dynamic("Root")
            .provider(ProviderDescriptor::value(Token::name("ROOT"), 2u8))
            .import(ModuleImport::deferred(async move { lazy }))
            .build();
        let ctx = context(MetadataRegistry::builder().build());
        register_module(&root.into(), &ctx).await.unwrap();
        assert_eq!(*ctx.container.get::<u8>(&Token::name("LAZY")).unwrap(), 1);
        assert_eq!(*ctx.container.get::<u8>(&Token::name("ROOT")).unwrap(), 2);
    }

    #[tokio::test]
    async fn short_lived_dynamic_modules_are_all_registered() {
        let ctx = context(MetadataRegistry::builder().build());
        for i in 0..20u32 {
            let module = ModuleDescriptor::dynamic("Feature")
                .provider(ProviderDescriptor::value(Token::name(format!("FEATURE_{i}")), i))
                .build();
            register_module(&module.into(), &ctx).await.unwrap();
        }

        for i in 0..20u32 {
            let token = Token::name(format!("FEATURE_{i}"));
            assert_eq!(*ctx.container.get::<u32>(&token).unwrap(), i);
        }
        assert_eq!(ctx.visited.lock().len(), 20);
    }

    #[tokio::test]
    async fn same_dynamic_module_imported_twice_registers_once() {
        let shared = ModuleDescriptor::dynamic("Shared")
            .provider(ProviderDescriptor::value(Token::name("SHARED"), 7u8))
            .build();
        let root = ModuleDescriptor::dynamic("Root")
            .import(Arc::clone(&shared))
            .import(shared)
            .build();
        let ctx = context(MetadataRegistry::builder().build());
        register_module(&root.into(), &ctx).await.unwrap();
        assert_eq!(ctx.visited.lock().len(), 2);
    }

    #[tokio::test]
    async fn middleware_bindings_get_the_global_prefix() {
        let ctx = context(registry(Arc::new(AtomicUsize::new(0))));
        let root = ModuleImport::class::<AppModule>();
        register_module(&root, &ctx).await.unwrap();

        let mut host = RecordingHost::default();
        configure_module_middleware(&root, &mut host, &ctx, "/api/").await.unwrap();

        assert_eq!(host.bindings.len(), 1);
        let binding = &host.bindings[0];
        assert_eq!(
            binding.routes,
            vec![
                RouteInfo::method(HttpMethod::Post, "/api/users"),
                RouteInfo::any("/api/users/:id"),
            ]
        );
        assert_eq!(binding.exclude, vec![RouteInfo::any("/api/users/health")]);
    }

    #[tokio::test]
    async fn middleware_pass_requires_registered_modules() {
        let ctx = context(registry(Arc::new(AtomicUsize::new(0))));
        let mut host = RecordingHost::default();
        let err = configure_module_middleware(&ModuleImport::class::<AppModule>(), &mut host, &ctx, "")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Container(_)));
    }
}

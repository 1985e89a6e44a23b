//! Module descriptors and imports.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::class::{ClassRef, Instance};
use crate::provider::ProviderSpec;
use crate::token::{Token, TypeKey};
use crate::traits::{cast_configurer, ConfigureMiddleware};

/// Typed view of a module instance as a middleware configurer.
pub type ConfigureCast = fn(Instance) -> Option<Arc<dyn ConfigureMiddleware>>;

/// A module still being produced asynchronously.
pub type DeferredModule = Shared<BoxFuture<'static, Arc<ModuleDescriptor>>>;

/// One module import.
#[derive(Clone)]
pub enum ModuleImport {
    /// A class module, looked up in the metadata registry.
    Class(TypeKey),
    /// A class module looked up by name.
    Named(String),
    /// An already-built dynamic module.
    Dynamic(Arc<ModuleDescriptor>),
    /// A dynamic module that is awaited before traversal continues.
    Deferred(DeferredModule),
}

impl ModuleImport {
    #[must_use]
    pub fn class<M: 'static>() -> Self {
        Self::Class(TypeKey::of::<M>())
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::Named(name.to_string())
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Arc<ModuleDescriptor>> + Send + 'static,
    {
        Self::Deferred(future.boxed().shared())
    }
}

impl From<Arc<ModuleDescriptor>> for ModuleImport {
    fn from(module: Arc<ModuleDescriptor>) -> Self {
        Self::Dynamic(module)
    }
}

impl fmt::Debug for ModuleImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(key) => f.debug_tuple("Class").field(&key.short_name()).finish(),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Dynamic(module) => f.debug_tuple("Dynamic").field(&module.name).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Providers, controllers and imports declared by one module.
///
/// Clones share the descriptor's id; every builder hands out a fresh one.
#[derive(Clone)]
pub struct ModuleDescriptor {
    id: u64,
    pub name: String,
    /// Set for class modules; dynamic modules may omit it.
    pub key: Option<TypeKey>,
    /// The module's own class, resolved for the middleware pass.
    pub class: Option<ClassRef>,
    pub providers: Vec<ProviderSpec>,
    pub controllers: Vec<ClassRef>,
    pub imports: Vec<ModuleImport>,
    pub exports: Vec<Token>,
    pub global: bool,
    pub middleware: Option<ConfigureCast>,
}

impl ModuleDescriptor {
    /// Class module described by `class`.
    #[must_use]
    pub fn builder(class: ClassRef) -> ModuleBuilder {
        ModuleBuilder {
            module: ModuleDescriptor {
                name: class.name().to_string(),
                key: Some(class.key()),
                class: Some(class),
                ..Self::empty(String::new())
            },
        }
    }

    /// Process-unique identity, stable for the descriptor's lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Dynamic module without a class of its own.
    #[must_use]
    pub fn dynamic(name: &str) -> ModuleBuilder {
        ModuleBuilder {
            module: Self::empty(name.to_string()),
        }
    }

    fn empty(name: String) -> Self {
        Self {
            id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            key: None,
            class: None,
            providers: Vec::new(),
            controllers: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            global: false,
            middleware: None,
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("providers", &self.providers.len())
            .field("controllers", &self.controllers.len())
            .field("imports", &self.imports)
            .field("exports", &self.exports)
            .field("global", &self.global)
            .field("middleware", &self.middleware.is_some())
            .finish()
    }
}

/// Builder for [`ModuleDescriptor`].
pub struct ModuleBuilder {
    module: ModuleDescriptor,
}

impl ModuleBuilder {
    #[must_use]
    pub fn provider(mut self, provider: impl Into<ProviderSpec>) -> Self {
        self.module.providers.push(provider.into());
        self
    }

    #[must_use]
    pub fn controller(mut self, controller: ClassRef) -> Self {
        self.module.controllers.push(controller);
        self
    }

    #[must_use]
    pub fn import(mut self, import: impl Into<ModuleImport>) -> Self {
        self.module.imports.push(import.into());
        self
    }

    #[must_use]
    pub fn export(mut self, token: Token) -> Self {
        self.module.exports.push(token);
        self
    }

    #[must_use]
    pub fn global(mut self) -> Self {
        self.module.global = true;
        self
    }

    /// Marks the module class `M` as configuring request middleware.
    #[must_use]
    pub fn configure_middleware<M: ConfigureMiddleware + 'static>(mut self) -> Self {
        self.module.middleware = Some(cast_configurer::<M>);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<ModuleDescriptor> {
        Arc::new(self.module)
    }
}

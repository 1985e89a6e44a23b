use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use trellis_core::class::{ClassRef, Instance, ParamType, ResolvedDeps};
use trellis_core::provider::{ProviderDescriptor, ProviderKind};
use trellis_core::token::Token;

// ---------------------------------------------------------------------------
// ContainerError
// ---------------------------------------------------------------------------

/// Errors raised while registering or resolving providers.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("{class} is not marked injectable")]
    NotInjectable { class: String },
    #[error("no provider registered for {token}")]
    UnknownToken { token: String },
    #[error("circular dependency: {path}")]
    CircularDependency { path: String },
    #[error("failed to construct {token}: {source}")]
    Construction {
        token: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{token} does not resolve to a {expected}")]
    TypeMismatch {
        token: String,
        expected: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Flat service container: provider descriptors keyed by token plus a
/// singleton cache populated on first resolution.
///
/// Resolution is synchronous. Each call carries its own resolution stack,
/// so a dependency cycle is reported as [`ContainerError::CircularDependency`]
/// rather than recursing without bound. When two callers race to build the
/// same token, the first instance inserted into the cache wins and both
/// observe it.
pub struct Container {
    descriptors: DashMap<Token, ProviderDescriptor>,
    instances: DashMap<Token, Instance>,
    /// Registration order, for deterministic listings.
    order: RwLock<Vec<Token>>,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: DashMap::new(),
            instances: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Stores `descriptor` under its token. A later registration of the same
    /// token replaces the descriptor; an instance already built is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotInjectable`] for a class provider whose
    /// class is not marked injectable. Nothing is registered in that case.
    pub fn register(&self, descriptor: ProviderDescriptor) -> Result<(), ContainerError> {
        if let ProviderKind::Class(class) = &descriptor.kind {
            if !class.is_injectable() {
                return Err(ContainerError::NotInjectable {
                    class: class.name().to_string(),
                });
            }
        }
        debug!(token = %descriptor.token, kind = descriptor.kind.label(), "provider registered");
        let token = descriptor.token.clone();
        if self.descriptors.insert(token.clone(), descriptor).is_none() {
            self.order.write().push(token);
        }
        Ok(())
    }

    /// Registers `class` as a class provider under its own token.
    ///
    /// # Errors
    ///
    /// See [`Container::register`].
    pub fn register_class(&self, class: ClassRef) -> Result<(), ContainerError> {
        self.register(ProviderDescriptor::class(class))
    }

    /// Returns the singleton for `token`, building it on first use.
    ///
    /// # Errors
    ///
    /// Fails when the token (or one of its dependencies) is unknown, when
    /// the dependency graph contains a cycle, or when a constructor or
    /// factory fails.
    pub fn resolve(&self, token: &Token) -> Result<Instance, ContainerError> {
        let mut stack = Vec::new();
        self.resolve_in(token, &mut stack)
    }

    /// Resolves `token` and downcasts the instance to `T`.
    ///
    /// # Errors
    ///
    /// As [`Container::resolve`], plus [`ContainerError::TypeMismatch`].
    pub fn get<T: Any + Send + Sync>(&self, token: &Token) -> Result<Arc<T>, ContainerError> {
        self.resolve(token)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                token: token.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Resolves the class provider registered for `T` itself.
    ///
    /// # Errors
    ///
    /// See [`Container::get`].
    pub fn get_type<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ContainerError> {
        self.get::<T>(&Token::of::<T>())
    }

    /// Whether a provider is registered for `token`.
    #[must_use]
    pub fn has(&self, token: &Token) -> bool {
        self.descriptors.contains_key(token)
    }

    /// Whether the singleton for `token` has already been built.
    #[must_use]
    pub fn is_resolved(&self, token: &Token) -> bool {
        self.instances.contains_key(token)
    }

    /// Registered tokens in registration order.
    #[must_use]
    pub fn tokens(&self) -> Vec<Token> {
        self.order.read().clone()
    }

    /// Drops every descriptor and cached instance.
    pub fn clear(&self) {
        self.instances.clear();
        self.descriptors.clear();
        self.order.write().clear();
    }

    fn resolve_in(&self, token: &Token, stack: &mut Vec<Token>) -> Result<Instance, ContainerError> {
        if let Some(instance) = self.instances.get(token) {
            return Ok(Arc::clone(instance.value()));
        }
        if stack.contains(token) {
            let mut path: Vec<String> = stack.iter().map(ToString::to_string).collect();
            path.push(token.to_string());
            return Err(ContainerError::CircularDependency {
                path: path.join(" -> "),
            });
        }

        // Clone out of the map so no shard guard is held while recursing.
        let descriptor = self
            .descriptors
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ContainerError::UnknownToken {
                token: token.to_string(),
            })?;

        stack.push(token.clone());
        let built = self.build(&descriptor, stack);
        stack.pop();
        let instance = built?;

        let cached = self.instances.entry(token.clone()).or_insert(instance);
        Ok(Arc::clone(cached.value()))
    }

    fn build(
        &self,
        descriptor: &ProviderDescriptor,
        stack: &mut Vec<Token>,
    ) -> Result<Instance, ContainerError> {
        let token = &descriptor.token;
        match &descriptor.kind {
            ProviderKind::Value(value) => Ok(Arc::clone(value)),
            ProviderKind::Factory(factory) => {
                let mut slots = Vec::with_capacity(descriptor.dependencies.len());
                for dep in &descriptor.dependencies {
                    slots.push(Some(self.resolve_in(dep, stack)?));
                }
                factory(&ResolvedDeps::new(slots)).map_err(|source| ContainerError::Construction {
                    token: token.to_string(),
                    source,
                })
            }
            ProviderKind::Class(class) => {
                let mut slots = Vec::with_capacity(class.params().len());
                for param in class.params() {
                    let slot = match (&param.inject, param.declared) {
                        (Some(custom), _) => Some(self.resolve_in(custom, stack)?),
                        (None, ParamType::Class(key)) => {
                            Some(self.resolve_in(&Token::Type(key), stack)?)
                        }
                        (None, ParamType::Primitive(_)) => None,
                    };
                    slots.push(slot);
                }
                class
                    .instantiate(&ResolvedDeps::new(slots))
                    .map_err(|source| ContainerError::Construction {
                        token: token.to_string(),
                        source,
                    })
            }
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use trellis_core::class::{ClassMeta, Primitive};

    use super::*;

    struct Config {
        url: String,
    }

    struct Repo {
        config: Arc<Config>,
    }

    struct UsersService {
        repo: Arc<Repo>,
        label: Option<Arc<String>>,
    }

    fn repo_class() -> ClassRef {
        ClassMeta::builder::<Repo>("Repo")
            .depends_on::<Config>()
            .construct(|deps| Ok(Repo { config: deps.get(0)? }))
    }

    fn users_class() -> ClassRef {
        ClassMeta::builder::<UsersService>("UsersService")
            .depends_on::<Repo>()
            .primitive(Primitive::String)
            .construct(|deps| {
                Ok(UsersService {
                    repo: deps.get(0)?,
                    label: deps.optional(1)?,
                })
            })
    }

    fn populated() -> Container {
        let container = Container::new();
        container
            .register(ProviderDescriptor::value(
                Token::of::<Config>(),
                Config { url: "db://".into() },
            ))
            .unwrap();
        container.register_class(repo_class()).unwrap();
        container.register_class(users_class()).unwrap();
        container
    }

    #[test]
    fn resolve_returns_same_instance() {
        let container = populated();
        let a = container.get_type::<UsersService>().unwrap();
        let b = container.get_type::<UsersService>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a.repo, &container.get_type::<Repo>().unwrap()));
        assert_eq!(a.repo.config.url, "db://");
    }

    #[test]
    fn primitive_params_resolve_to_nothing() {
        let container = populated();
        let users = container.get_type::<UsersService>().unwrap();
        assert!(users.label.is_none());
    }

    #[test]
    fn not_injectable_class_is_rejected_before_construction() {
        static BUILT: AtomicU32 = AtomicU32::new(0);
        let class = ClassMeta::builder::<Config>("Config")
            .not_injectable()
            .construct(|_| {
                BUILT.fetch_add(1, Ordering::SeqCst);
                Ok(Config { url: String::new() })
            });

        let container = Container::new();
        let err = container.register_class(class).unwrap_err();
        assert!(matches!(err, ContainerError::NotInjectable { class } if class == "Config"));
        assert!(!container.has(&Token::of::<Config>()));
        assert_eq!(BUILT.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn custom_inject_token_takes_precedence() {
        struct Mailer {
            from: Arc<String>,
        }
        let class = ClassMeta::builder::<Mailer>("Mailer")
            .inject(Token::name("MAIL_FROM"))
            .construct(|deps| Ok(Mailer { from: deps.get(0)? }));

        let container = Container::new();
        container
            .register(ProviderDescriptor::value(
                Token::name("MAIL_FROM"),
                String::from("noreply@example.com"),
            ))
            .unwrap();
        container.register_class(class).unwrap();

        let mailer = container.get_type::<Mailer>().unwrap();
        assert_eq!(mailer.from.as_str(), "noreply@example.com");
    }

    #[test]
    fn factory_receives_dependencies_in_order() {
        let container = Container::new();
        container
            .register(ProviderDescriptor::value(Token::name("HOST"), String::from("localhost")))
            .unwrap();
        container
            .register(ProviderDescriptor::value(Token::name("PORT"), 5432u16))
            .unwrap();
        container
            .register(ProviderDescriptor::factory(
                Token::name("DSN"),
                vec![Token::name("HOST"), Token::name("PORT")],
                |deps| Ok(format!("{}:{}", deps.get::<String>(0)?, deps.get::<u16>(1)?)),
            ))
            .unwrap();

        let dsn = container.get::<String>(&Token::name("DSN")).unwrap();
        assert_eq!(dsn.as_str(), "localhost:5432");
    }

    #[test]
    fn factory_runs_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let container = Container::new();
        container
            .register(ProviderDescriptor::factory(Token::name("N"), vec![], |_| {
                Ok(CALLS.fetch_add(1, Ordering::SeqCst))
            }))
            .unwrap();
        container.resolve(&Token::name("N")).unwrap();
        container.resolve(&Token::name("N")).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cycle_is_reported() {
        struct A;
        struct B;
        let container = Container::new();
        container
            .register_class(ClassMeta::builder::<A>("A").depends_on::<B>().construct(|_| Ok(A)))
            .unwrap();
        container
            .register_class(ClassMeta::builder::<B>("B").depends_on::<A>().construct(|_| Ok(B)))
            .unwrap();

        let err = container.resolve(&Token::of::<A>()).unwrap_err();
        let ContainerError::CircularDependency { path } = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(path, "A -> B -> A");
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let container = Container::new();
        container.register_class(repo_class()).unwrap();
        let err = container.resolve(&Token::of::<Repo>()).unwrap_err();
        assert!(matches!(err, ContainerError::UnknownToken { token } if token == "Config"));
    }

    #[test]
    fn constructor_failure_is_wrapped() {
        let container = Container::new();
        container
            .register(ProviderDescriptor::factory::<u8, _>(Token::name("BAD"), vec![], |_| {
                Err(anyhow::anyhow!("boom"))
            }))
            .unwrap();
        let err = container.resolve(&Token::name("BAD")).unwrap_err();
        assert!(matches!(err, ContainerError::Construction { .. }));
        assert!(!container.is_resolved(&Token::name("BAD")));
    }

    #[test]
    fn get_reports_type_mismatch() {
        let container = populated();
        let err = container.get::<String>(&Token::of::<Config>()).unwrap_err();
        assert!(matches!(err, ContainerError::TypeMismatch { .. }));
    }

    #[test]
    fn clear_drops_descriptors_and_instances() {
        let container = populated();
        container.get_type::<UsersService>().unwrap();
        assert_eq!(container.tokens().len(), 3);

        container.clear();
        assert!(!container.has(&Token::of::<UsersService>()));
        assert!(!container.is_resolved(&Token::of::<UsersService>()));
        assert!(container.tokens().is_empty());
    }

    #[test]
    fn concurrent_first_resolution_yields_one_instance() {
        let container = Arc::new(populated());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = Arc::clone(&container);
                std::thread::spawn(move || container.get_type::<UsersService>().unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(instances.iter().all(|i| Arc::ptr_eq(i, &instances[0])));
    }
}

//! Provider descriptors: how a token is turned into an instance.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::class::{ClassRef, Instance, ResolvedDeps};
use crate::token::Token;

/// Factory closure; receives the resolved `dependencies` in declaration order.
pub type FactoryFn = Arc<dyn Fn(&ResolvedDeps) -> anyhow::Result<Instance> + Send + Sync>;

/// How the instance behind a token is produced.
#[derive(Clone)]
pub enum ProviderKind {
    /// Constructed from class metadata.
    Class(ClassRef),
    /// A pre-built value.
    Value(Instance),
    /// Built by a factory closure.
    Factory(FactoryFn),
}

impl ProviderKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Class(_) => "class",
            Self::Value(_) => "value",
            Self::Factory(_) => "factory",
        }
    }
}

/// A provider registration keyed by `token`.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub token: Token,
    pub kind: ProviderKind,
    /// Tokens resolved and handed to a factory, in order. Unused by the
    /// other kinds.
    pub dependencies: Vec<Token>,
}

impl ProviderDescriptor {
    /// Class provider using the class itself as token.
    #[must_use]
    pub fn class(class: ClassRef) -> Self {
        Self {
            token: class.token(),
            kind: ProviderKind::Class(class),
            dependencies: Vec::new(),
        }
    }

    /// Class provider registered under a different token.
    #[must_use]
    pub fn use_class(token: Token, class: ClassRef) -> Self {
        Self {
            token,
            kind: ProviderKind::Class(class),
            dependencies: Vec::new(),
        }
    }

    /// Value provider.
    #[must_use]
    pub fn value<T: Any + Send + Sync>(token: Token, value: T) -> Self {
        Self {
            token,
            kind: ProviderKind::Value(Arc::new(value)),
            dependencies: Vec::new(),
        }
    }

    /// Value provider from an already shared instance.
    #[must_use]
    pub fn instance(token: Token, instance: Instance) -> Self {
        Self {
            token,
            kind: ProviderKind::Value(instance),
            dependencies: Vec::new(),
        }
    }

    /// Factory provider.
    pub fn factory<T, F>(token: Token, dependencies: Vec<Token>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ResolvedDeps) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            token,
            kind: ProviderKind::Factory(Arc::new(move |deps| {
                Ok(Arc::new(factory(deps)?) as Instance)
            })),
            dependencies,
        }
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("token", &self.token)
            .field("kind", &self.kind.label())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A provider entry in a module descriptor.
#[derive(Debug, Clone)]
pub enum ProviderSpec {
    /// A bare class; registered as a class provider under its own token.
    Class(ClassRef),
    /// An object-shaped provider (`value`, `factory` or `use_class`).
    Descriptor(ProviderDescriptor),
}

impl ProviderSpec {
    #[must_use]
    pub fn token(&self) -> Token {
        match self {
            Self::Class(class) => class.token(),
            Self::Descriptor(descriptor) => descriptor.token.clone(),
        }
    }
}

impl From<ClassRef> for ProviderSpec {
    fn from(class: ClassRef) -> Self {
        Self::Class(class)
    }
}

impl From<ProviderDescriptor> for ProviderSpec {
    fn from(descriptor: ProviderDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}

//! Class metadata: the explicit replacement for constructor reflection.
//!
//! A [`ClassMeta`] describes one injectable type: whether it may be
//! constructed by the container, the declared type of every constructor
//! parameter (with an optional custom injection token), and the closure that
//! builds an instance from resolved dependencies.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::token::{Token, TypeKey};

/// A type-erased service instance held by the container.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Shared reference to class metadata.
pub type ClassRef = Arc<ClassMeta>;

/// Builds an instance from its resolved constructor dependencies.
pub type Constructor = Arc<dyn Fn(&ResolvedDeps) -> anyhow::Result<Instance> + Send + Sync>;

// ---------------------------------------------------------------------------
// Constructor parameters
// ---------------------------------------------------------------------------

/// Primitive wrapper types. Parameters declared with one of these are plain
/// data and are never resolved through the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Object,
    String,
    Number,
    Boolean,
    Array,
}

/// Declared (inferred) type of a constructor parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Primitive(Primitive),
    Class(TypeKey),
}

/// One constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtorParam {
    pub declared: ParamType,
    /// Custom injection token; takes precedence over `declared`.
    pub inject: Option<Token>,
}

// ---------------------------------------------------------------------------
// ResolvedDeps
// ---------------------------------------------------------------------------

/// Dependencies resolved for a constructor or factory, in declaration order.
///
/// A `None` slot is a primitive parameter that resolved to nothing.
#[derive(Default, Clone)]
pub struct ResolvedDeps {
    slots: Vec<Option<Instance>>,
}

impl ResolvedDeps {
    #[must_use]
    pub fn new(slots: Vec<Option<Instance>>) -> Self {
        Self { slots }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Raw instance at `index`, if any.
    #[must_use]
    pub fn raw(&self, index: usize) -> Option<&Instance> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Typed dependency at `index`.
    ///
    /// # Errors
    ///
    /// Fails when the slot is empty or holds a different type.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Arc<T>> {
        self.optional(index)?.ok_or_else(|| {
            anyhow!(
                "dependency #{index} ({}) was not resolved",
                std::any::type_name::<T>()
            )
        })
    }

    /// Typed dependency at `index`, `None` when the slot is empty.
    ///
    /// # Errors
    ///
    /// Fails when the slot holds a different type.
    pub fn optional<T: Any + Send + Sync>(&self, index: usize) -> anyhow::Result<Option<Arc<T>>> {
        match self.raw(index) {
            None => Ok(None),
            Some(instance) => Arc::clone(instance).downcast::<T>().map(Some).map_err(|_| {
                anyhow!(
                    "dependency #{index} is not a {}",
                    std::any::type_name::<T>()
                )
            }),
        }
    }
}

impl fmt::Debug for ResolvedDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(Option::is_some))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ClassMeta
// ---------------------------------------------------------------------------

/// Metadata recorded for one class at definition time.
pub struct ClassMeta {
    key: TypeKey,
    name: String,
    injectable: bool,
    params: Vec<CtorParam>,
    construct: Constructor,
}

impl ClassMeta {
    /// Starts describing class `T`. The class is injectable unless
    /// [`ClassBuilder::not_injectable`] is called.
    #[must_use]
    pub fn builder<T: Any + Send + Sync>(name: impl Into<String>) -> ClassBuilder<T> {
        ClassBuilder {
            name: name.into(),
            injectable: true,
            params: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Shorthand for an injectable class without constructor parameters.
    #[must_use]
    pub fn unit<T: Any + Send + Sync>(name: impl Into<String>, make: fn() -> T) -> ClassRef {
        Self::builder::<T>(name).construct(move |_| Ok(make()))
    }

    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    #[must_use]
    pub fn token(&self) -> Token {
        Token::Type(self.key)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_injectable(&self) -> bool {
        self.injectable
    }

    #[must_use]
    pub fn params(&self) -> &[CtorParam] {
        &self.params
    }

    /// Runs the constructor.
    ///
    /// # Errors
    ///
    /// Propagates the constructor's own error.
    pub fn instantiate(&self, deps: &ResolvedDeps) -> anyhow::Result<Instance> {
        (self.construct)(deps)
    }
}

impl fmt::Debug for ClassMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMeta")
            .field("name", &self.name)
            .field("injectable", &self.injectable)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ClassMeta`].
pub struct ClassBuilder<T> {
    name: String,
    injectable: bool,
    params: Vec<CtorParam>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ClassBuilder<T> {
    /// Marks the class as not constructible by the container.
    #[must_use]
    pub fn not_injectable(mut self) -> Self {
        self.injectable = false;
        self
    }

    /// Adds a parameter whose declared type is the class `D`.
    #[must_use]
    pub fn depends_on<D: 'static>(mut self) -> Self {
        self.params.push(CtorParam {
            declared: ParamType::Class(TypeKey::of::<D>()),
            inject: None,
        });
        self
    }

    /// Adds a primitive-typed parameter (always resolves to nothing).
    #[must_use]
    pub fn primitive(mut self, primitive: Primitive) -> Self {
        self.params.push(CtorParam {
            declared: ParamType::Primitive(primitive),
            inject: None,
        });
        self
    }

    /// Adds a parameter resolved through a custom token.
    #[must_use]
    pub fn inject(mut self, token: Token) -> Self {
        self.params.push(CtorParam {
            declared: ParamType::Primitive(Primitive::Object),
            inject: Some(token),
        });
        self
    }

    /// Adds a fully specified parameter.
    #[must_use]
    pub fn param(mut self, param: CtorParam) -> Self {
        self.params.push(param);
        self
    }

    /// Finishes the metadata with the constructor closure.
    pub fn construct<F>(self, construct: F) -> ClassRef
    where
        F: Fn(&ResolvedDeps) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Arc::new(ClassMeta {
            key: TypeKey::of::<T>(),
            name: self.name,
            injectable: self.injectable,
            params: self.params,
            construct: Arc::new(move |deps| Ok(Arc::new(construct(deps)?) as Instance)),
        })
    }
}

//! Explicit registries filled by the module graph builder and read by the
//! route registrar and the GraphQL schema builder.

use std::sync::Arc;

use parking_lot::RwLock;
use trellis_core::graphql::ResolverMeta;
use trellis_core::route::ControllerMeta;
use trellis_core::token::TypeKey;

/// Controllers discovered while walking the module graph, in discovery
/// order. A controller class is recorded once.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    entries: RwLock<Vec<Arc<ControllerMeta>>>,
}

impl ControllerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `meta`; returns `false` if the class was already present.
    pub fn add(&self, meta: Arc<ControllerMeta>) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|m| m.class.key() == meta.class.key()) {
            return false;
        }
        entries.push(meta);
        true
    }

    #[must_use]
    pub fn contains(&self, key: TypeKey) -> bool {
        self.entries.read().iter().any(|m| m.class.key() == key)
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<ControllerMeta>> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Resolver classes discovered among module providers.
#[derive(Debug, Default)]
pub struct ResolverRegistry {
    entries: RwLock<Vec<Arc<ResolverMeta>>>,
}

impl ResolverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `meta`; returns `false` if the class was already present.
    pub fn add(&self, meta: Arc<ResolverMeta>) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|m| m.key() == meta.key()) {
            return false;
        }
        entries.push(meta);
        true
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<ResolverMeta>> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

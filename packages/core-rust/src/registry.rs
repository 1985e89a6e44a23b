//! The metadata registry read by the kernel during bootstrap.

use std::collections::HashMap;
use std::sync::Arc;

use crate::class::ClassRef;
use crate::graphql::{ObjectTypeMeta, ResolverMeta};
use crate::module::ModuleDescriptor;
use crate::route::ControllerMeta;
use crate::token::TypeKey;

/// Every class, module, controller, resolver and object type known to an
/// application. Immutable once built.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    classes: HashMap<TypeKey, ClassRef>,
    modules: HashMap<TypeKey, Arc<ModuleDescriptor>>,
    module_names: HashMap<String, Arc<ModuleDescriptor>>,
    controllers: HashMap<TypeKey, Arc<ControllerMeta>>,
    resolvers: HashMap<TypeKey, Arc<ResolverMeta>>,
    object_types: HashMap<TypeKey, Arc<ObjectTypeMeta>>,
}

impl MetadataRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn class(&self, key: TypeKey) -> Option<&ClassRef> {
        self.classes.get(&key)
    }

    #[must_use]
    pub fn module(&self, key: TypeKey) -> Option<&Arc<ModuleDescriptor>> {
        self.modules.get(&key)
    }

    #[must_use]
    pub fn module_by_name(&self, name: &str) -> Option<&Arc<ModuleDescriptor>> {
        self.module_names.get(name)
    }

    #[must_use]
    pub fn controller(&self, key: TypeKey) -> Option<&Arc<ControllerMeta>> {
        self.controllers.get(&key)
    }

    #[must_use]
    pub fn resolver(&self, key: TypeKey) -> Option<&Arc<ResolverMeta>> {
        self.resolvers.get(&key)
    }

    #[must_use]
    pub fn object_type(&self, key: TypeKey) -> Option<&Arc<ObjectTypeMeta>> {
        self.object_types.get(&key)
    }
}

/// Collects metadata before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    inner: MetadataRegistry,
}

impl RegistryBuilder {
    #[must_use]
    pub fn class(mut self, class: ClassRef) -> Self {
        self.inner.classes.insert(class.key(), class);
        self
    }

    /// Registers a module under its name, and under its key when it has one.
    #[must_use]
    pub fn module(mut self, module: Arc<ModuleDescriptor>) -> Self {
        if let Some(class) = &module.class {
            self.inner.classes.insert(class.key(), Arc::clone(class));
        }
        if let Some(key) = module.key {
            self.inner.modules.insert(key, Arc::clone(&module));
        }
        self.inner
            .module_names
            .insert(module.name.clone(), module);
        self
    }

    #[must_use]
    pub fn controller(mut self, controller: Arc<ControllerMeta>) -> Self {
        let key = controller.class.key();
        self.inner.classes.insert(key, Arc::clone(&controller.class));
        self.inner.controllers.insert(key, controller);
        self
    }

    #[must_use]
    pub fn resolver(mut self, resolver: Arc<ResolverMeta>) -> Self {
        let key = resolver.key();
        self.inner.classes.insert(key, Arc::clone(&resolver.class));
        self.inner.resolvers.insert(key, resolver);
        self
    }

    #[must_use]
    pub fn object_type(mut self, meta: ObjectTypeMeta) -> Self {
        self.inner.object_types.insert(meta.key, Arc::new(meta));
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MetadataRegistry> {
        Arc::new(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassMeta;
    use crate::graphql::FieldDescriptor;
    use crate::graphql::TypeRef;

    struct UsersModule;
    struct UsersController;
    struct User;

    #[test]
    fn lookups_by_key_and_name() {
        let module = ModuleDescriptor::builder(ClassMeta::unit::<UsersModule>("UsersModule", || UsersModule)).build();
        let controller = ControllerMeta::builder(
            ClassMeta::unit::<UsersController>("UsersController", || UsersController),
            "users",
        )
        .build();

        let registry = MetadataRegistry::builder()
            .module(module)
            .controller(controller)
            .object_type(ObjectTypeMeta::object::<User>("User").field(FieldDescriptor::new("id", || TypeRef::Int)))
            .build();

        let key = TypeKey::of::<UsersModule>();
        assert!(registry.module(key).is_some());
        assert!(registry.class(key).is_some());
        assert_eq!(registry.module_by_name("UsersModule").unwrap().key, Some(key));
        assert!(registry.controller(TypeKey::of::<UsersController>()).is_some());
        assert!(registry.class(TypeKey::of::<UsersController>()).is_some());
        assert_eq!(registry.object_type(TypeKey::of::<User>()).unwrap().fields.len(), 1);
        assert!(registry.resolver(TypeKey::of::<User>()).is_none());
    }

    #[test]
    fn dynamic_module_is_named_only() {
        let registry = MetadataRegistry::builder()
            .module(ModuleDescriptor::dynamic("ConfigModule").build())
            .build();
        assert!(registry.module_by_name("ConfigModule").is_some());
        assert!(registry.module(TypeKey::of::<UsersModule>()).is_none());
    }
}

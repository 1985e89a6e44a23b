//! Runtime GraphQL types and the identity-preserving type resolver.
//!
//! Object and input types are created once per source type and cached
//! before their fields are ever looked at. Field maps are computed on first
//! access, so a field may reference a type that did not exist yet when its
//! owner was created.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use trellis_core::graphql::{ObjectKind, ObjectTypeMeta, TypeRef};
use trellis_core::registry::MetadataRegistry;
use trellis_core::token::TypeKey;

// ---------------------------------------------------------------------------
// GraphQLType
// ---------------------------------------------------------------------------

/// Built-in scalars, plus the permissive `JSON` scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    String,
    Int,
    Float,
    Boolean,
    Json,
}

impl Scalar {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::Json => "JSON",
        }
    }
}

/// A resolved GraphQL type. Object and input types are shared by `Arc`, so
/// two references to the same source type point at the same object.
#[derive(Clone)]
pub enum GraphQLType {
    Scalar(Scalar),
    List(Box<GraphQLType>),
    Object(Arc<ObjectType>),
    Input(Arc<ObjectType>),
}

impl GraphQLType {
    /// Name of the innermost named type.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(s) => s.name(),
            Self::List(inner) => inner.name(),
            Self::Object(obj) | Self::Input(obj) => obj.name(),
        }
    }

    /// Type reference as written in SDL; `non_null` adds the trailing `!`.
    #[must_use]
    pub fn display(&self, non_null: bool) -> String {
        let base = match self {
            Self::List(inner) => format!("[{}]", inner.display(true)),
            other => other.name().to_string(),
        };
        if non_null {
            format!("{base}!")
        } else {
            base
        }
    }

    /// The object type, for output types that need a selection set.
    #[must_use]
    pub fn as_object(&self) -> Option<&Arc<ObjectType>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Whether both refer to the same type object. Scalars compare by kind.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.same(b),
            (Self::Object(a), Self::Object(b)) | (Self::Input(a), Self::Input(b)) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for GraphQLType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display(false))
    }
}

// ---------------------------------------------------------------------------
// ObjectType
// ---------------------------------------------------------------------------

/// One field of an object or input type.
#[derive(Debug, Clone)]
pub struct ObjectField {
    pub name: String,
    pub ty: GraphQLType,
    pub nullable: bool,
}

/// An object or input type synthesized from type metadata.
pub struct ObjectType {
    meta: Arc<ObjectTypeMeta>,
    resolver: Weak<TypeResolver>,
    fields: OnceLock<Vec<ObjectField>>,
}

impl ObjectType {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.meta.kind
    }

    #[must_use]
    pub fn is_input(&self) -> bool {
        self.meta.is_input()
    }

    /// The field map, computed on first call.
    pub fn fields(&self) -> &[ObjectField] {
        self.fields.get_or_init(|| {
            let Some(resolver) = self.resolver.upgrade() else {
                return Vec::new();
            };
            self.meta
                .fields
                .iter()
                .map(|field| ObjectField {
                    name: field.name.clone(),
                    ty: resolver.resolve(&field.type_ref()),
                    nullable: field.nullable,
                })
                .collect()
        })
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ObjectField> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Whether the field map has been computed yet.
    #[must_use]
    pub fn is_realized(&self) -> bool {
        self.fields.get().is_some()
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("name", &self.meta.name)
            .field("kind", &self.meta.kind)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// TypeResolver
// ---------------------------------------------------------------------------

/// Maps source types to GraphQL types, caching by source type identity.
pub struct TypeResolver {
    registry: Arc<MetadataRegistry>,
    this: Weak<TypeResolver>,
    /// Insertion ordered, so SDL output is stable.
    cache: Mutex<Vec<(TypeKey, GraphQLType)>>,
}

impl TypeResolver {
    #[must_use]
    pub fn new(registry: Arc<MetadataRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            this: this.clone(),
            cache: Mutex::new(Vec::new()),
        })
    }

    /// Resolves `ty`.
    ///
    /// Lists resolve elementwise, markers to their scalar, and classes with
    /// object or input metadata to a cached type object. Anything else
    /// becomes `String`.
    #[must_use]
    pub fn resolve(&self, ty: &TypeRef) -> GraphQLType {
        match ty {
            TypeRef::String | TypeRef::Other(_) => GraphQLType::Scalar(Scalar::String),
            TypeRef::Number | TypeRef::Int => GraphQLType::Scalar(Scalar::Int),
            TypeRef::Float => GraphQLType::Scalar(Scalar::Float),
            TypeRef::Boolean => GraphQLType::Scalar(Scalar::Boolean),
            TypeRef::Json => GraphQLType::Scalar(Scalar::Json),
            TypeRef::List(inner) => GraphQLType::List(Box::new(self.resolve(inner))),
            TypeRef::Class(key) => self.resolve_class(*key),
        }
    }

    fn resolve_class(&self, key: TypeKey) -> GraphQLType {
        let mut cache = self.cache.lock();
        if let Some((_, ty)) = cache.iter().find(|(k, _)| *k == key) {
            return ty.clone();
        }
        let Some(meta) = self.registry.object_type(key) else {
            return GraphQLType::Scalar(Scalar::String);
        };
        let object = Arc::new(ObjectType {
            meta: Arc::clone(meta),
            resolver: self.this.clone(),
            fields: OnceLock::new(),
        });
        let ty = if object.is_input() {
            GraphQLType::Input(object)
        } else {
            GraphQLType::Object(object)
        };
        cache.push((key, ty.clone()));
        ty
    }

    /// Every object and input type created so far, in creation order.
    #[must_use]
    pub fn types(&self) -> Vec<GraphQLType> {
        self.cache.lock().iter().map(|(_, ty)| ty.clone()).collect()
    }

    /// Forces every cached type's field map, including types discovered
    /// while doing so.
    pub fn realize_all(&self) {
        let mut seen = 0;
        loop {
            let pending: Vec<GraphQLType> = self.cache.lock().iter().skip(seen).map(|(_, t)| t.clone()).collect();
            if pending.is_empty() {
                return;
            }
            seen += pending.len();
            for ty in pending {
                if let GraphQLType::Object(obj) | GraphQLType::Input(obj) = ty {
                    obj.fields();
                }
            }
        }
    }
}

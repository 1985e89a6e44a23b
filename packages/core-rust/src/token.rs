//! Injection tokens: the keys providers are registered and resolved under.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// TypeKey
// ---------------------------------------------------------------------------

/// Identity of a Rust type used as a class reference.
///
/// Equality and hashing use only the `TypeId`; the name is carried for
/// diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for the concrete type `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified Rust type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name (`app::users::UsersService` -> `UsersService`).
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Symbol
// ---------------------------------------------------------------------------

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

/// A unique token with a human-readable description.
///
/// Two symbols created with the same description are still distinct.
#[derive(Debug, Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    #[must_use]
    pub fn new(description: &str) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: Arc::from(description),
        }
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// Registration key of a provider: a class reference, a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// A class reference.
    Type(TypeKey),
    /// A string token.
    Name(Cow<'static, str>),
    /// A unique symbol token.
    Symbol(Symbol),
}

impl Token {
    /// Class token for `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self::Type(TypeKey::of::<T>())
    }

    /// String token.
    #[must_use]
    pub fn name(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Name(name.into())
    }

    /// Fresh symbol token.
    #[must_use]
    pub fn symbol(description: &str) -> Self {
        Self::Symbol(Symbol::new(description))
    }

    /// Returns the type key when this token is a class reference.
    #[must_use]
    pub fn type_key(&self) -> Option<TypeKey> {
        match self {
            Self::Type(key) => Some(*key),
            _ => None,
        }
    }
}

impl From<TypeKey> for Token {
    fn from(key: TypeKey) -> Self {
        Self::Type(key)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(key) => f.write_str(key.short_name()),
            Self::Name(name) => write!(f, "\"{name}\""),
            Self::Symbol(sym) => write!(f, "Symbol({})", sym.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn type_tokens_compare_by_type() {
        assert_eq!(Token::of::<Alpha>(), Token::of::<Alpha>());
        assert_ne!(Token::of::<Alpha>(), Token::of::<Beta>());
    }

    #[test]
    fn symbols_with_same_description_are_distinct() {
        let a = Token::symbol("CONFIG");
        let b = Token::symbol("CONFIG");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn name_tokens_compare_by_content() {
        const CONST_TOKEN: Token = Token::Name(Cow::Borrowed("DATABASE"));
        assert_eq!(CONST_TOKEN, Token::name(String::from("DATABASE")));

        let mut set = HashSet::new();
        set.insert(CONST_TOKEN);
        assert!(set.contains(&Token::name("DATABASE")));
    }

    #[test]
    fn display_uses_short_type_name() {
        assert_eq!(Token::of::<Alpha>().to_string(), "Alpha");
        assert_eq!(Token::name("x").to_string(), "\"x\"");
        assert_eq!(Token::symbol("s").to_string(), "Symbol(s)");
    }
}

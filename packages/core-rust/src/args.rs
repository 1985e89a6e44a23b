//! Bound handler arguments.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{FieldViolation, KernelError};
use crate::http::{HttpRequest, ResponseHandle};
use crate::types::Principal;

/// One bound argument.
#[derive(Debug, Clone, Default)]
pub enum Arg {
    /// Nothing was bound at this position.
    #[default]
    Missing,
    Value(Value),
    User(Option<Principal>),
    Request(Arc<HttpRequest>),
    Response(ResponseHandle),
}

/// Arguments handed to a handler, positioned by parameter index.
#[derive(Debug, Clone, Default)]
pub struct Args {
    slots: Vec<Arg>,
}

impl Args {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `arg` at `index`, padding earlier gaps with [`Arg::Missing`].
    pub fn set(&mut self, index: usize, arg: Arg) {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, Arg::default);
        }
        self.slots[index] = arg;
    }

    #[must_use]
    pub fn with(mut self, index: usize, arg: Arg) -> Self {
        self.set(index, arg);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> &Arg {
        static MISSING: Arg = Arg::Missing;
        self.slots.get(index).unwrap_or(&MISSING)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.slots.iter()
    }

    /// JSON value at `index`, if one was bound.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.get(index) {
            Arg::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Deserializes the value at `index`; a missing slot parses as `null`.
    ///
    /// # Errors
    ///
    /// Returns a 400-class validation error when the value does not fit `T`.
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T, KernelError> {
        let value = match self.get(index) {
            Arg::Value(value) => value.clone(),
            Arg::User(Some(user)) => user.to_value(),
            _ => Value::Null,
        };
        serde_json::from_value(value).map_err(|err| {
            KernelError::validation(vec![FieldViolation::new(
                format!("arg{index}"),
                err.to_string(),
            )])
        })
    }

    /// Bound user at `index`.
    #[must_use]
    pub fn user(&self, index: usize) -> Option<&Principal> {
        match self.get(index) {
            Arg::User(user) => user.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn request(&self, index: usize) -> Option<&Arc<HttpRequest>> {
        match self.get(index) {
            Arg::Request(request) => Some(request),
            _ => None,
        }
    }

    #[must_use]
    pub fn response(&self, index: usize) -> Option<&ResponseHandle> {
        match self.get(index) {
            Arg::Response(response) => Some(response),
            _ => None,
        }
    }

    /// Whether every bound slot is plain data (no request/response handles).
    #[must_use]
    pub fn is_plain_data(&self) -> bool {
        self.slots
            .iter()
            .all(|arg| !matches!(arg, Arg::Request(_) | Arg::Response(_)))
    }

    /// JSON rendering of the plain-data slots, used as a cache key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let values: Vec<Value> = self
            .slots
            .iter()
            .map(|arg| match arg {
                Arg::Value(value) => value.clone(),
                Arg::User(Some(user)) => user.to_value(),
                _ => Value::Null,
            })
            .collect();
        Value::Array(values).to_string()
    }
}

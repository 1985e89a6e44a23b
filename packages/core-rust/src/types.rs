use serde::{Deserialize, Serialize};

/// Value produced by a handler. `None` means the handler returned nothing.
pub type Reply = Option<serde_json::Value>;

/// Authenticated principal bound to a request by the authentication guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// JSON view handed to handlers that bind the current user.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "id": self.id, "roles": self.roles })
    }
}

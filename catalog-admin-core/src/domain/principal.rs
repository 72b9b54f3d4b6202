use serde::{Deserialize, Serialize};

use super::ids::PrincipalId;

/// Authenticated identity resolved from a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: PrincipalId, email: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            id,
            email: email.into(),
            roles,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.roles.iter().any(|r| roles.contains(&r.as_str()))
    }
}

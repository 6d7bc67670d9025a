//! Authenticated principals and registration input.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Role granted to newly registered users.
pub const DEFAULT_ROLE: &str = "user";

/// Scopes granted to newly registered users.
pub const DEFAULT_SCOPES: [&str; 2] = ["read", "write"];

/// Minimum username length accepted at registration.
pub const MIN_USERNAME_LEN: usize = 3;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 6;

/// A user as seen by the token authority. Roles and scopes are read fresh
/// from the credential store on every login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub is_active: bool,
}

/// Registration request body.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub roles: Option<BTreeSet<String>>,
    #[serde(default)]
    pub scopes: Option<BTreeSet<String>>,
}

impl NewUser {
    /// Checks field-level constraints. Uniqueness is checked by the store.
    ///
    /// # Errors
    /// Returns a human readable description of the first violated rule.
    pub fn validate(&self) -> Result<(), String> {
        if self.username.trim().chars().count() < MIN_USERNAME_LEN {
            return Err(format!(
                "username must be at least {MIN_USERNAME_LEN} characters"
            ));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err("email must be a valid address".to_string()),
        }
    }
}

/// Public view of a registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub is_active: bool,
}

impl From<&Principal> for UserView {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            email: p.email.clone(),
            roles: p.roles.clone(),
            is_active: p.is_active,
        }
    }
}

//! Credential store trait and an in-memory implementation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::password::{hash_password, verify_dummy, verify_password};
use crate::types::{DEFAULT_ROLE, DEFAULT_SCOPES, NewUser, Principal};

/// Source of truth for user credentials, roles and scopes.
///
/// The authority calls [`find_principal`](Self::find_principal) on every
/// refresh, so role or scope changes take effect at the next refresh
/// instead of living on in rotated tokens.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Checks a username/password pair.
    ///
    /// Returns `Ok(None)` when the pair does not match; implementations
    /// must not distinguish an unknown username from a wrong password.
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<Principal>>;

    /// Loads a principal by ID.
    async fn find_principal(&self, subject_id: &str) -> AuthResult<Option<Principal>>;

    /// Registers a new user.
    ///
    /// # Errors
    /// `InvalidRequest` for field validation failures, `Conflict` for a
    /// taken username or email.
    async fn register(&self, new_user: NewUser) -> AuthResult<Principal>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    principal: Principal,
    password_hash: String,
}

/// Credential store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    users: DashMap<String, StoredUser>,
    by_username: DashMap<String, String>,
    by_email: DashMap<String, String>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Activates or deactivates an account. Returns `false` for unknown IDs.
    pub fn set_active(&self, subject_id: &str, active: bool) -> bool {
        match self.users.get_mut(subject_id) {
            Some(mut user) => {
                user.principal.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Replaces the roles of an account. Returns `false` for unknown IDs.
    pub fn set_roles(&self, subject_id: &str, roles: BTreeSet<String>) -> bool {
        match self.users.get_mut(subject_id) {
            Some(mut user) => {
                user.principal.roles = roles;
                true
            }
            None => false,
        }
    }

    /// Replaces the scopes of an account. Returns `false` for unknown IDs.
    pub fn set_scopes(&self, subject_id: &str, scopes: BTreeSet<String>) -> bool {
        match self.users.get_mut(subject_id) {
            Some(mut user) => {
                user.principal.scopes = scopes;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<Principal>> {
        let user = self
            .by_username
            .get(&normalize(username))
            .map(|id| id.clone())
            .and_then(|id| self.users.get(&id).map(|u| u.clone()));

        // A missing account still pays for one Argon2 verification.
        let password = password.to_string();
        let hash = user.as_ref().map(|u| u.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || match hash {
            Some(hash) => verify_password(&password, &hash),
            None => verify_dummy(&password),
        })
        .await
        .map_err(|e| AuthError::internal(e.to_string()))?;

        Ok(user.filter(|_| matches).map(|u| u.principal))
    }

    async fn find_principal(&self, subject_id: &str) -> AuthResult<Option<Principal>> {
        Ok(self.users.get(subject_id).map(|u| u.principal.clone()))
    }

    async fn register(&self, new_user: NewUser) -> AuthResult<Principal> {
        new_user.validate().map_err(AuthError::invalid_request)?;

        let password = new_user.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::internal(e.to_string()))?
            .map_err(|e| AuthError::internal(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let username_key = normalize(&new_user.username);
        let email_key = normalize(&new_user.email);

        match self.by_username.entry(username_key.clone()) {
            Entry::Occupied(_) => return Err(AuthError::conflict("username already registered")),
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }
        match self.by_email.entry(email_key) {
            Entry::Occupied(_) => {
                self.by_username.remove(&username_key);
                return Err(AuthError::conflict("email already registered"));
            }
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }

        let principal = Principal {
            id: id.clone(),
            username: new_user.username.trim().to_string(),
            email: new_user.email.trim().to_string(),
            roles: new_user
                .roles
                .unwrap_or_else(|| BTreeSet::from([DEFAULT_ROLE.to_string()])),
            scopes: new_user
                .scopes
                .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()),
            is_active: true,
        };
        self.users.insert(
            id,
            StoredUser {
                principal: principal.clone(),
                password_hash,
            },
        );

        info!(user_id = %principal.id, username = %principal.username, "User registered");
        Ok(principal)
    }
}

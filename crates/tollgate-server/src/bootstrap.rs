//! Creates configured accounts at startup.

use std::collections::BTreeSet;

use tollgate_auth::{AuthError, CredentialStore, NewUser};
use tracing::{info, warn};

use crate::config::BootstrapUser;

/// Registers each configured user. Accounts that already exist are left
/// alone; any other failure aborts startup.
///
/// Returns the number of accounts created.
pub async fn bootstrap_users(
    store: &dyn CredentialStore,
    users: &[BootstrapUser],
) -> anyhow::Result<usize> {
    let mut created = 0;
    for user in users {
        let non_empty = |values: &[String]| {
            (!values.is_empty()).then(|| values.iter().cloned().collect::<BTreeSet<_>>())
        };
        let new_user = NewUser {
            username: user.username.clone(),
            email: user.email.clone(),
            password: user.password.clone(),
            roles: non_empty(&user.roles),
            scopes: non_empty(&user.scopes),
        };
        match store.register(new_user).await {
            Ok(principal) => {
                created += 1;
                info!(user_id = %principal.id, username = %principal.username, roles = ?principal.roles, "Bootstrap user created");
            }
            Err(AuthError::Conflict { .. }) => {
                warn!(username = %user.username, "Bootstrap user already exists, skipping");
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "bootstrap user '{}' rejected: {e}",
                    user.username
                ));
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use tollgate_auth::InMemoryCredentialStore;

    use super::*;

    fn user(name: &str, roles: &[&str]) -> BootstrapUser {
        BootstrapUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            password: "bootstrap-pass".into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            scopes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_creates_users_with_roles() {
        let store = InMemoryCredentialStore::new();
        let created = bootstrap_users(&store, &[user("admin", &["admin"]), user("viewer", &[])])
            .await
            .unwrap();
        assert_eq!(created, 2);

        let admin = store
            .verify_credentials("admin", "bootstrap-pass")
            .await
            .unwrap()
            .unwrap();
        assert!(admin.roles.contains("admin"));

        let viewer = store
            .verify_credentials("viewer", "bootstrap-pass")
            .await
            .unwrap()
            .unwrap();
        assert!(viewer.roles.contains("user"));
    }

    #[tokio::test]
    async fn test_existing_users_are_skipped() {
        let store = InMemoryCredentialStore::new();
        let users = [user("admin", &["admin"])];
        assert_eq!(bootstrap_users(&store, &users).await.unwrap(), 1);
        assert_eq!(bootstrap_users(&store, &users).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_user_fails() {
        let store = InMemoryCredentialStore::new();
        let mut bad = user("admin", &[]);
        bad.password = "123".into();
        assert!(bootstrap_users(&store, &[bad]).await.is_err());
    }
}

//! Refresh token and credential storage.

pub mod credentials;
pub mod refresh;

pub use credentials::{CredentialStore, InMemoryCredentialStore};
pub use refresh::{RefreshError, RefreshStore};

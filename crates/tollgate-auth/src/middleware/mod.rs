//! HTTP extractors and error responses.

pub mod auth;
pub mod error;

pub use auth::{AdminAuth, AuthState, BearerAuth, bearer_token};
pub use error::{REALM, status_for, www_authenticate};

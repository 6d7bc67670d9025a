//! HTTP surface of the token authority.

pub mod admin;
pub mod discovery;
pub mod introspect;
pub mod jwks;
pub mod logout;
pub mod token;
pub mod userinfo;
pub mod users;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::AuthState;

pub use admin::{create_user_handler, rotate_keys_handler};
pub use discovery::{openid_configuration, openid_configuration_handler};
pub use introspect::introspect_handler;
pub use jwks::jwks_handler;
pub use logout::logout_handler;
pub use token::token_handler;
pub use userinfo::{current_user_handler, userinfo_handler};
pub use users::register_handler;

/// Builds the authority router with its state applied.
pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/api/v1/auth/token", post(token_handler))
        .route("/api/v1/auth/introspect", post(introspect_handler))
        .route("/api/v1/auth/userinfo", get(userinfo_handler))
        .route("/api/v1/auth/logout", post(logout_handler))
        .route("/api/v1/users/register", post(register_handler))
        .route("/api/v1/users/me", get(current_user_handler))
        .route("/api/v1/admin/keys/rotate", post(rotate_keys_handler))
        .route("/api/v1/admin/users", post(create_user_handler))
        .route("/.well-known/jwks.json", get(jwks_handler))
        .route(
            "/.well-known/openid-configuration",
            get(openid_configuration_handler),
        )
        .with_state(state)
}

//! Administrative endpoints. All require the `admin` role.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::info;

use crate::error::AuthError;
use crate::middleware::{AdminAuth, AuthState};
use crate::types::{NewUser, UserView};

#[derive(Debug, Clone, Serialize)]
pub struct RotatedKey {
    pub kid: String,
    pub algorithm: &'static str,
    pub published_keys: usize,
}

/// Handler for `POST /api/v1/admin/keys/rotate`.
pub async fn rotate_keys_handler(
    State(state): State<AuthState>,
    AdminAuth(admin): AdminAuth,
) -> Result<Json<RotatedKey>, AuthError> {
    // RSA generation can take a while; keep it off the async workers.
    let authority = state.authority.clone();
    let kid = tokio::task::spawn_blocking(move || authority.rotate_signing_key())
        .await
        .map_err(|e| AuthError::internal(e.to_string()))??;

    let ring = state.authority.key_ring();
    info!(kid = %kid, requested_by = %admin.sub, "Signing key rotated on request");
    Ok(Json(RotatedKey {
        kid,
        algorithm: ring.algorithm().as_str(),
        published_keys: ring.public_key_set().len(),
    }))
}

/// Handler for `POST /api/v1/admin/users`.
///
/// Unlike self-registration, honours the requested roles and scopes.
pub async fn create_user_handler(
    State(state): State<AuthState>,
    AdminAuth(admin): AdminAuth,
    Json(new_user): Json<NewUser>,
) -> Result<(StatusCode, Json<UserView>), AuthError> {
    let principal = state.authority.register(new_user).await?;
    info!(
        user_id = %principal.id,
        roles = ?principal.roles,
        created_by = %admin.sub,
        "User created by admin"
    );
    Ok((StatusCode::CREATED, Json(UserView::from(&principal))))
}

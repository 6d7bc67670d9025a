//! Self-service registration.

use axum::{Json, extract::State, http::StatusCode};

use crate::error::AuthError;
use crate::middleware::AuthState;
use crate::types::{NewUser, UserView};

/// Handler for `POST /api/v1/users/register`.
///
/// Self-registered accounts always get the default role and scopes; any
/// `roles` or `scopes` in the body are ignored.
pub async fn register_handler(
    State(state): State<AuthState>,
    Json(mut new_user): Json<NewUser>,
) -> Result<(StatusCode, Json<UserView>), AuthError> {
    if !state.config.registration_enabled {
        return Err(AuthError::forbidden("registration is disabled"));
    }
    new_user.roles = None;
    new_user.scopes = None;

    let principal = state.authority.register(new_user).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&principal))))
}

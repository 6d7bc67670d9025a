//! Userinfo and current-user endpoints.

use axum::{Json, extract::State};

use crate::authority::UserInfo;
use crate::error::AuthError;
use crate::middleware::{AuthState, BearerAuth};
use crate::types::UserView;

/// Handler for `GET /api/v1/auth/userinfo`.
///
/// Returns the identity carried by the bearer access token.
pub async fn userinfo_handler(BearerAuth(claims): BearerAuth) -> Json<UserInfo> {
    Json(UserInfo::from(claims))
}

/// Handler for `GET /api/v1/users/me`.
///
/// Unlike userinfo this reads the account from the credential store, so it
/// reflects role changes made after the token was issued.
pub async fn current_user_handler(
    State(state): State<AuthState>,
    BearerAuth(claims): BearerAuth,
) -> Result<Json<UserView>, AuthError> {
    let principal = state
        .authority
        .credentials()
        .find_principal(&claims.sub)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| AuthError::invalid_token("account no longer available"))?;
    Ok(Json(UserView::from(&principal)))
}

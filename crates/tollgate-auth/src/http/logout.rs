//! Logout (refresh chain revocation).

use axum::{Form, Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::middleware::AuthState;

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}

/// Handler for `POST /api/v1/auth/logout`.
///
/// Always 200, so callers cannot probe which tokens are live.
pub async fn logout_handler(
    State(state): State<AuthState>,
    Form(request): Form<LogoutRequest>,
) -> Json<LogoutResponse> {
    let revoked = state.authority.logout(&request.refresh_token);
    Json(LogoutResponse { revoked })
}

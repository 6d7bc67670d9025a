//! OAuth-style error responses for `AuthError`.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use crate::error::AuthError;

/// Realm advertised in `WWW-Authenticate` challenges.
pub const REALM: &str = "tollgate";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let code = self.oauth_error_code();

        let description = if status.is_server_error() {
            error!(error = %self, "Auth request failed");
            "internal server error".to_string()
        } else {
            if self.is_security_event() {
                warn!(error = %self, "Auth security event");
            }
            self.to_string()
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(value) = HeaderValue::from_str(&www_authenticate(code, &description)) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        let body = json!({
            "error": code,
            "error_description": description,
        });
        (status, headers, Json(body)).into_response()
    }
}

/// Maps an error to its HTTP status.
#[must_use]
pub fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidCredentials
        | AuthError::InvalidToken { .. }
        | AuthError::TokenReused => StatusCode::UNAUTHORIZED,
        AuthError::InvalidRequest { .. } | AuthError::UnsupportedGrantType { .. } => {
            StatusCode::BAD_REQUEST
        }
        AuthError::Conflict { .. } => StatusCode::CONFLICT,
        AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
        AuthError::KeyGeneration { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Storage { .. } | AuthError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Builds a `WWW-Authenticate` challenge.
///
/// Format: `Bearer realm="tollgate", error="invalid_token", error_description="..."`
#[must_use]
pub fn www_authenticate(error: &str, description: &str) -> String {
    let escaped = description.replace('"', "\\\"");
    format!("Bearer realm=\"{REALM}\", error=\"{error}\", error_description=\"{escaped}\"")
}

//! Token endpoint handler.
//!
//! Supports the `password` and `refresh_token` grants:
//!
//! ```text
//! POST /api/v1/auth/token
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=password&username=alice&password=wonderland
//! ```

use axum::{
    Form, Json,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::error::AuthError;
use crate::middleware::AuthState;

/// Token endpoint form body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, AuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("missing {name}")))
}

/// Handler for `POST /api/v1/auth/token`.
pub async fn token_handler(
    State(state): State<AuthState>,
    Form(request): Form<TokenRequest>,
) -> Result<Response, AuthError> {
    let pair = match request.grant_type.as_str() {
        "password" => {
            let username = required(&request.username, "username")?;
            let password = required(&request.password, "password")?;
            state.authority.login(username, password).await?
        }
        "refresh_token" => {
            let refresh_token = required(&request.refresh_token, "refresh_token")?;
            state.authority.refresh(refresh_token).await?
        }
        other => return Err(AuthError::unsupported_grant_type(other)),
    };

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(pair),
    )
        .into_response())
}

//! Token introspection endpoint.
//!
//! Always answers 200 with a JSON body. An inactive token yields
//! `{"active": false}` and nothing else, whatever the reason.

use axum::{Form, Json, extract::State};
use serde::Deserialize;

use crate::authority::IntrospectionResponse;
use crate::middleware::AuthState;

/// Introspection form body.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionRequest {
    #[serde(default)]
    pub token: String,
    /// Accepted for compatibility; the token type is read from the token.
    #[serde(default)]
    pub token_type_hint: Option<String>,
}

/// Handler for `POST /api/v1/auth/introspect`.
pub async fn introspect_handler(
    State(state): State<AuthState>,
    Form(request): Form<IntrospectionRequest>,
) -> Json<IntrospectionResponse> {
    Json(state.authority.introspect(&request.token))
}

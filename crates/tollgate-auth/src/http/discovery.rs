//! OpenID discovery document.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::config::AuthConfig;
use crate::middleware::AuthState;

/// Builds the discovery document for `config`. Endpoint URLs are derived
/// from the issuer, not from the bind address.
#[must_use]
pub fn openid_configuration(config: &AuthConfig) -> Value {
    let base = config.issuer.trim_end_matches('/');
    json!({
        "issuer": config.issuer,
        "token_endpoint": format!("{base}/api/v1/auth/token"),
        "userinfo_endpoint": format!("{base}/api/v1/auth/userinfo"),
        "introspection_endpoint": format!("{base}/api/v1/auth/introspect"),
        "revocation_endpoint": format!("{base}/api/v1/auth/logout"),
        "registration_endpoint": config
            .registration_enabled
            .then(|| format!("{base}/api/v1/users/register")),
        "jwks_uri": format!("{base}/.well-known/jwks.json"),
        "grant_types_supported": ["password", "refresh_token"],
        "response_types_supported": ["token"],
        "subject_types_supported": ["public"],
        "token_endpoint_auth_methods_supported": ["none"],
        "id_token_signing_alg_values_supported": [config.signing.algorithm.as_str()],
        "claims_supported": [
            "sub", "iss", "iat", "exp", "jti", "type",
            "username", "email", "roles", "scopes"
        ],
    })
}

/// Handler for `GET /.well-known/openid-configuration`.
pub async fn openid_configuration_handler(State(state): State<AuthState>) -> Json<Value> {
    Json(openid_configuration(&state.config))
}

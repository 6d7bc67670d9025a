//! JWKS endpoint.
//!
//! Publishes every key in the ring, active key first. Clients may cache the
//! document; a rotation becomes visible when their cache expires, and
//! retired keys stay listed long enough to cover that window.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::middleware::AuthState;

/// How long clients may cache the key set.
pub const JWKS_MAX_AGE_SECS: u64 = 300;

/// Handler for `GET /.well-known/jwks.json`.
pub async fn jwks_handler(State(state): State<AuthState>) -> impl IntoResponse {
    let jwks = state.authority.key_ring().public_key_set().to_jwks();
    (
        [(
            header::CACHE_CONTROL,
            format!("public, max-age={JWKS_MAX_AGE_SECS}"),
        )],
        Json(jwks),
    )
}

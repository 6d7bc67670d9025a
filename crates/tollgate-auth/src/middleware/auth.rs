//! Bearer token extractors.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use tollgate_auth::middleware::BearerAuth;
//!
//! async fn whoami(BearerAuth(claims): BearerAuth) -> String {
//!     claims.username
//! }
//!
//! let app = Router::new()
//!     .route("/whoami", get(whoami))
//!     .with_state(auth_state);
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

use crate::authority::TokenAuthority;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::token::AccessClaims;

/// Shared state for the authority's HTTP surface.
#[derive(Clone)]
pub struct AuthState {
    pub authority: Arc<TokenAuthority>,
    pub config: Arc<AuthConfig>,
}

impl AuthState {
    #[must_use]
    pub fn new(authority: Arc<TokenAuthority>, config: Arc<AuthConfig>) -> Self {
        Self { authority, config }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; an empty token counts as absent.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Validates the bearer access token and yields its claims.
pub struct BearerAuth(pub AccessClaims);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AuthError::invalid_token("missing bearer token"))?;

        let claims = auth_state.authority.verify_access(token).map_err(|e| {
            tracing::debug!(error = %e, "Bearer token rejected");
            e
        })?;
        Ok(BearerAuth(claims))
    }
}

/// Like [`BearerAuth`] but additionally requires the `admin` role.
pub struct AdminAuth(pub AccessClaims);

impl AdminAuth {
    pub const ADMIN_ROLE: &'static str = "admin";
}

impl<S> FromRequestParts<S> for AdminAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let BearerAuth(claims) = BearerAuth::from_request_parts(parts, state).await?;
        if !claims.has_role(Self::ADMIN_ROLE) {
            tracing::debug!(
                user_id = %claims.sub,
                roles = ?claims.roles,
                "Admin access denied: missing admin role"
            );
            return Err(AuthError::forbidden("admin role required"));
        }
        Ok(AdminAuth(claims))
    }
}

//! # tollgate-auth
//!
//! Token authority for the Tollgate gateway.
//!
//! This crate provides:
//! - A rotating ring of signing keys, published as a JWKS
//! - Signing and verification of access and refresh tokens
//! - Refresh token rotation with reuse detection and chain revocation
//! - Credential storage and self-service registration
//! - Axum handlers for the token, introspection, userinfo and logout endpoints
//!
//! ## Modules
//!
//! - [`token`] - Signing keys, key ring, claims and the token codec
//! - [`storage`] - Refresh token and credential stores
//! - [`authority`] - Login, refresh, introspection and logout
//! - [`middleware`] - Bearer extractors and error responses
//! - [`http`] - Axum handlers and the authority router
//! - [`config`] - Token lifetimes, signing and registration settings

pub mod authority;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod password;
pub mod storage;
pub mod token;
pub mod types;

pub use authority::{IntrospectionResponse, TokenAuthority, TokenPair, UserInfo};
pub use config::{AuthConfig, ConfigError, SigningConfig, TokenConfig};
pub use error::AuthError;
pub use http::router;
pub use middleware::{AdminAuth, AuthState, BearerAuth, bearer_token};
pub use storage::{CredentialStore, InMemoryCredentialStore, RefreshError, RefreshStore};
pub use token::{
    AccessClaims, AccessGrant, AnyClaims, Jwk, Jwks, KeyError, KeyRing, PublicKeySet, RefreshClaims,
    SigningAlgorithm, SigningKeyPair, TokenCodec, TokenError, TokenType, Verified,
};
pub use types::{NewUser, Principal, RefreshToken, UserView};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

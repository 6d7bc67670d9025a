//! Token claim sets.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Distinguishes access tokens from refresh tokens inside the signed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

/// A claim set that can be verified by [`TokenCodec`](super::TokenCodec).
pub trait TokenClaims: Serialize + DeserializeOwned {
    /// The `type` claim value this claim set must carry.
    const TOKEN_TYPE: TokenType;
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (principal ID).
    pub sub: String,

    pub username: String,

    pub email: String,

    #[serde(default)]
    pub roles: BTreeSet<String>,

    #[serde(default)]
    pub scopes: BTreeSet<String>,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// JWT ID.
    pub jti: String,
}

impl AccessClaims {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl TokenClaims for AccessClaims {
    const TOKEN_TYPE: TokenType = TokenType::Access;
}

/// Claims carried by a refresh token. The token itself is opaque to the
/// client; validity is decided by the refresh store using `jti`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub iss: String,

    pub sub: String,

    /// Refresh record ID.
    pub jti: String,

    /// Rotation chain ID.
    pub chain: String,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    pub iat: i64,

    pub exp: i64,
}

impl TokenClaims for RefreshClaims {
    const TOKEN_TYPE: TokenType = TokenType::Refresh;
}

/// The identity an access token is issued for.
#[derive(Debug, Clone, Default)]
pub struct AccessGrant {
    pub subject: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
}

/// Either kind of verified claim set, as seen by introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyClaims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl AnyClaims {
    #[must_use]
    pub fn token_type(&self) -> TokenType {
        match self {
            Self::Access(_) => TokenType::Access,
            Self::Refresh(_) => TokenType::Refresh,
        }
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        match self {
            Self::Access(c) => &c.sub,
            Self::Refresh(c) => &c.sub,
        }
    }
}

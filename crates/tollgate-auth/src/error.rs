//! Client-facing errors for the token authority.
//!
//! Internal failures from the codec and stores are collapsed into a small,
//! stable set of categories. None of them reveal whether a username exists
//! or why exactly a token was rejected.

use crate::storage::RefreshError;
use crate::token::{KeyError, TokenError};

/// Errors returned by [`TokenAuthority`](crate::TokenAuthority) and the HTTP handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Unknown user, wrong password or inactive account.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Any token that fails verification or is no longer exchangeable.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Short, non-revealing description.
        message: String,
    },

    /// A refresh token was presented twice. Its chain is revoked.
    #[error("Refresh token reuse detected; re-authentication required")]
    TokenReused,

    /// The request is missing a parameter or has an invalid one.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what is invalid.
        message: String,
    },

    /// The grant type is not supported.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// A unique field is already taken.
    #[error("Conflict: {message}")]
    Conflict {
        /// Which value is already in use.
        message: String,
    },

    /// The caller is authenticated but lacks a required role.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access was denied.
        message: String,
    },

    /// Signing key material could not be generated.
    #[error("Key generation error: {message}")]
    KeyGeneration {
        /// Description of the generation failure.
        message: String,
    },

    /// Credential store failure.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// Internal server error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials | Self::TokenReused => "invalid_grant",
            Self::InvalidToken { .. } => "invalid_token",
            Self::InvalidRequest { .. } | Self::Conflict { .. } => "invalid_request",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::Forbidden { .. } => "insufficient_scope",
            Self::KeyGeneration { .. } | Self::Storage { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }

    /// Returns `true` if the client caused this error.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::KeyGeneration { .. } | Self::Storage { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error should be recorded as a security event.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::TokenReused | Self::Forbidden { .. }
        )
    }
}

/// Client-facing description for every token that fails verification.
/// Expired, forged, malformed and unknown-key tokens all read the same.
pub const INVALID_TOKEN_DESCRIPTION: &str = "token could not be verified";

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding { message } => Self::internal(message),
            _ => Self::invalid_token(INVALID_TOKEN_DESCRIPTION),
        }
    }
}

impl From<RefreshError> for AuthError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::TokenReused { .. } => Self::TokenReused,
            RefreshError::TokenNotFound | RefreshError::TokenExpired => {
                Self::invalid_token("refresh token is no longer valid")
            }
        }
    }
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::KeyGeneration { message } => Self::KeyGeneration { message },
            other => Self::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_collapse_to_invalid_token() {
        for err in [
            TokenError::Expired,
            TokenError::InvalidSignature,
            TokenError::UnknownKeyId { kid: "k".into() },
            TokenError::malformed("bad"),
        ] {
            assert_eq!(
                AuthError::from(err),
                AuthError::invalid_token(INVALID_TOKEN_DESCRIPTION)
            );
        }
        assert!(matches!(
            AuthError::from(TokenError::encoding("x")),
            AuthError::Internal { .. }
        ));
    }

    #[test]
    fn test_refresh_errors() {
        assert_eq!(
            AuthError::from(RefreshError::TokenReused {
                chain_id: uuid::Uuid::nil()
            }),
            AuthError::TokenReused
        );
        assert!(matches!(
            AuthError::from(RefreshError::TokenExpired),
            AuthError::InvalidToken { .. }
        ));
    }

    #[test]
    fn test_classification() {
        assert!(AuthError::InvalidCredentials.is_client_error());
        assert!(AuthError::InvalidCredentials.is_security_event());
        assert!(!AuthError::internal("x").is_client_error());
        assert_eq!(AuthError::TokenReused.oauth_error_code(), "invalid_grant");
        assert_eq!(
            AuthError::unsupported_grant_type("implicit").oauth_error_code(),
            "unsupported_grant_type"
        );
    }
}

//! Signed token encoding and verification.
//!
//! Verification is stateless and runs in a fixed order:
//!
//! 1. The header must parse and declare a `kid`
//! 2. The `kid` must be in the supplied [`PublicKeySet`]
//! 3. The signature must verify under that key
//! 4. The token must not be expired (`now > exp` fails)
//! 5. The claims must carry the issuer, a subject and the expected `type`
//!
//! Expiry is checked by hand instead of through `jsonwebtoken`'s built-in
//! leeway so that access decisions get zero tolerance while introspection
//! gets a fixed grace window.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use super::claims::{AccessClaims, AccessGrant, AnyClaims, RefreshClaims, TokenClaims, TokenType};
use super::key_ring::PublicKeySet;
use super::keys::SigningKeyPair;
use crate::types::RefreshToken;

/// Default grace window past `exp` accepted by introspection.
pub const DEFAULT_INTROSPECTION_GRACE: Duration = Duration::from_secs(60);

/// Token verification and encoding failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// The signature does not verify under the declared key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token is past its expiry.
    #[error("Token expired")]
    Expired,

    /// The token cannot be parsed or its claims have the wrong shape.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// What was wrong with the token.
        message: String,
    },

    /// The token names a key that is not published.
    #[error("Unknown key id: {kid}")]
    UnknownKeyId {
        /// The key ID from the token header.
        kid: String,
    },

    /// Signing failed.
    #[error("Failed to encode token: {message}")]
    Encoding {
        /// Description of the encoding error.
        message: String,
    },
}

impl TokenError {
    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Creates a new `Encoding` error.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::malformed(err.to_string()),
        }
    }
}

/// A verified claim set together with the key that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified<T> {
    pub claims: T,
    pub key_id: String,
}

/// A freshly signed token and the claims inside it.
#[derive(Debug, Clone)]
pub struct IssuedToken<T> {
    pub token: String,
    pub claims: T,
}

/// Encodes and verifies signed tokens for one issuer.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    issuer: String,
    introspection_grace: Duration,
}

impl TokenCodec {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            introspection_grace: DEFAULT_INTROSPECTION_GRACE,
        }
    }

    /// Sets the grace window accepted past `exp` during introspection.
    #[must_use]
    pub fn with_introspection_grace(mut self, grace: Duration) -> Self {
        self.introspection_grace = grace;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Signs an access token for `grant` valid for `ttl`.
    ///
    /// # Errors
    /// Returns `Encoding` if signing fails.
    pub fn issue_access(
        &self,
        grant: &AccessGrant,
        key: &SigningKeyPair,
        ttl: Duration,
    ) -> Result<IssuedToken<AccessClaims>, TokenError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: grant.subject.clone(),
            username: grant.username.clone(),
            email: grant.email.clone(),
            roles: grant.roles.clone(),
            scopes: grant.scopes.clone(),
            token_type: TokenType::Access,
            iat: now,
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.sign(&claims, key)?;
        Ok(IssuedToken { token, claims })
    }

    /// Signs a refresh token for a stored refresh record. The record's
    /// expiry is the token's expiry.
    ///
    /// # Errors
    /// Returns `Encoding` if signing fails.
    pub fn issue_refresh(
        &self,
        record: &RefreshToken,
        key: &SigningKeyPair,
    ) -> Result<IssuedToken<RefreshClaims>, TokenError> {
        let claims = RefreshClaims {
            iss: self.issuer.clone(),
            sub: record.subject_id.clone(),
            jti: record.token_id.to_string(),
            chain: record.chain_id.to_string(),
            token_type: TokenType::Refresh,
            iat: record.issued_at.unix_timestamp(),
            exp: record.expires_at.unix_timestamp(),
        };
        let token = self.sign(&claims, key)?;
        Ok(IssuedToken { token, claims })
    }

    /// Signs an arbitrary claim set with `key`, stamping its `kid`.
    ///
    /// # Errors
    /// Returns `Encoding` if signing fails.
    pub fn sign<T: Serialize>(&self, claims: &T, key: &SigningKeyPair) -> Result<String, TokenError> {
        let mut header = Header::new(key.algorithm().to_jwt_algorithm());
        header.kid = Some(key.kid().to_string());
        encode(&header, claims, key.encoding_key()).map_err(|e| TokenError::encoding(e.to_string()))
    }

    /// Verifies a token for an access decision. No expiry grace applies.
    ///
    /// # Errors
    /// Returns the first check that fails, in the order listed in the
    /// module docs.
    pub fn verify<T: TokenClaims>(
        &self,
        token: &str,
        keys: &PublicKeySet,
    ) -> Result<Verified<T>, TokenError> {
        let (payload, key_id) = self.decode_checked(token, keys, Duration::ZERO)?;
        self.check_shape(&payload, Some(T::TOKEN_TYPE))?;
        let claims = serde_json::from_value(payload)
            .map_err(|e| TokenError::malformed(e.to_string()))?;
        Ok(Verified { claims, key_id })
    }

    /// Verifies either token type, accepting tokens up to the introspection
    /// grace window past expiry.
    ///
    /// # Errors
    /// Same as [`verify`](Self::verify).
    pub fn verify_for_introspection(
        &self,
        token: &str,
        keys: &PublicKeySet,
    ) -> Result<Verified<AnyClaims>, TokenError> {
        let (payload, key_id) = self.decode_checked(token, keys, self.introspection_grace)?;
        let token_type = self.check_shape(&payload, None)?;
        let claims = match token_type {
            TokenType::Access => serde_json::from_value(payload).map(AnyClaims::Access),
            TokenType::Refresh => serde_json::from_value(payload).map(AnyClaims::Refresh),
        }
        .map_err(|e| TokenError::malformed(e.to_string()))?;
        Ok(Verified { claims, key_id })
    }

    /// Steps 1 to 4: key resolution, signature and expiry.
    fn decode_checked(
        &self,
        token: &str,
        keys: &PublicKeySet,
        grace: Duration,
    ) -> Result<(Value, String), TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::malformed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| TokenError::malformed("missing kid header"))?;
        let key = keys
            .get(&kid)
            .ok_or_else(|| TokenError::UnknownKeyId { kid: kid.clone() })?;

        let mut validation = Validation::new(key.algorithm().to_jwt_algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Value>(token, key.decoding_key(), &validation)?;

        let exp = data
            .claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| TokenError::malformed("missing exp claim"))?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if now > exp.saturating_add(i64::try_from(grace.as_secs()).unwrap_or(i64::MAX)) {
            return Err(TokenError::Expired);
        }

        Ok((data.claims, kid))
    }

    /// Step 5: issuer, subject and token type.
    fn check_shape(
        &self,
        payload: &Value,
        expected: Option<TokenType>,
    ) -> Result<TokenType, TokenError> {
        match payload.get("iss").and_then(Value::as_str) {
            Some(iss) if iss == self.issuer => {}
            _ => return Err(TokenError::malformed("issuer mismatch")),
        }
        match payload.get("sub").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => {}
            _ => return Err(TokenError::malformed("missing subject")),
        }
        let token_type: TokenType = payload
            .get("type")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| TokenError::malformed("missing or unknown type claim"))?;
        if let Some(expected) = expected {
            if token_type != expected {
                return Err(TokenError::malformed(format!(
                    "expected {} token, got {}",
                    expected.as_str(),
                    token_type.as_str()
                )));
            }
        }
        Ok(token_type)
    }
}

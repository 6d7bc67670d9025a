//! Token authority: login, refresh, introspection, userinfo and logout.
//!
//! Login and refresh mutate the refresh store; introspection and userinfo
//! are read-only. Every operation reads the key ring through a snapshot,
//! so a concurrent rotation never blocks or tears a request.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::storage::{CredentialStore, RefreshStore};
use crate::token::{
    AccessClaims, AccessGrant, AnyClaims, KeyRing, RefreshClaims, SigningKeyPair, TokenCodec,
};
use crate::types::{NewUser, Principal, RefreshToken};

/// Access/refresh token pair as returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Always "Bearer".
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

/// Token introspection response (RFC 7662 shaped).
///
/// Inactive tokens carry only `active: false`; the reason is never revealed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<BTreeSet<String>>,

    /// "access" or "refresh".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Key that signed the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl IntrospectionResponse {
    /// Response for any token that is not active.
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    fn from_access(claims: AccessClaims, kid: String) -> Self {
        Self {
            active: true,
            sub: Some(claims.sub),
            username: Some(claims.username),
            email: Some(claims.email),
            roles: Some(claims.roles),
            scopes: Some(claims.scopes),
            token_type: Some(claims.token_type.as_str().to_string()),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            iss: Some(claims.iss),
            jti: Some(claims.jti),
            kid: Some(kid),
        }
    }

    fn from_refresh(claims: RefreshClaims, kid: String) -> Self {
        Self {
            active: true,
            sub: Some(claims.sub),
            token_type: Some(claims.token_type.as_str().to_string()),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            iss: Some(claims.iss),
            jti: Some(claims.jti),
            kid: Some(kid),
            ..Self::default()
        }
    }
}

/// Userinfo endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    pub username: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
}

impl From<AccessClaims> for UserInfo {
    fn from(claims: AccessClaims) -> Self {
        Self {
            sub: claims.sub,
            username: claims.username,
            email: claims.email,
            roles: claims.roles,
            scopes: claims.scopes,
        }
    }
}

/// Orchestrates the token lifecycle.
pub struct TokenAuthority {
    key_ring: Arc<KeyRing>,
    codec: TokenCodec,
    refresh_store: Arc<RefreshStore>,
    credentials: Arc<dyn CredentialStore>,
    access_ttl: Duration,
}

impl TokenAuthority {
    #[must_use]
    pub fn new(
        config: &AuthConfig,
        key_ring: Arc<KeyRing>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            key_ring,
            codec: TokenCodec::new(config.issuer.clone())
                .with_introspection_grace(config.tokens.introspection_grace),
            refresh_store: Arc::new(RefreshStore::new(config.tokens.refresh_token_lifetime)),
            credentials,
            access_ttl: config.tokens.access_token_lifetime,
        }
    }

    #[must_use]
    pub fn key_ring(&self) -> &Arc<KeyRing> {
        &self.key_ring
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub fn refresh_store(&self) -> &Arc<RefreshStore> {
        &self.refresh_store
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Exchanges a username and password for a token pair.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown user, wrong password or inactive
    /// account, without saying which.
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<TokenPair> {
        let principal = match self.credentials.verify_credentials(username, password).await? {
            Some(p) if p.is_active => p,
            Some(p) => {
                debug!(user_id = %p.id, "Login rejected for inactive account");
                return Err(AuthError::InvalidCredentials);
            }
            None => return Err(AuthError::InvalidCredentials),
        };

        let key = self.key_ring.active();
        let record = self.refresh_store.issue(&principal.id, key.kid());
        let pair = self.issue_pair(&principal, &record, &key)?;
        info!(user_id = %principal.id, key_id = %key.kid(), "Login succeeded");
        Ok(pair)
    }

    /// Exchanges a refresh token for a new pair, rotating it.
    ///
    /// Roles and scopes are re-read from the credential store.
    ///
    /// # Errors
    /// - `TokenReused` if the token was already exchanged; its chain is revoked
    /// - `InvalidToken` for anything else that makes the token unusable
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let keys = self.key_ring.public_key_set();
        let verified = self
            .codec
            .verify::<RefreshClaims>(refresh_token, &keys)
            .map_err(|e| {
                debug!(error = %e, "Refresh token rejected");
                AuthError::from(e)
            })?;
        let token_id = Uuid::parse_str(&verified.claims.jti)
            .map_err(|_| AuthError::invalid_token("refresh token is no longer valid"))?;

        let principal = match self
            .credentials
            .find_principal(&verified.claims.sub)
            .await?
        {
            Some(p) if p.is_active => p,
            _ => {
                self.refresh_store.revoke(token_id);
                return Err(AuthError::invalid_token("refresh token is no longer valid"));
            }
        };

        let key = self.key_ring.active();
        let record = self.refresh_store.rotate(token_id, key.kid()).map_err(|e| {
            if matches!(e, crate::storage::RefreshError::TokenReused { .. }) {
                warn!(user_id = %principal.id, "Refresh token replay, chain revoked");
            }
            AuthError::from(e)
        })?;
        if record.subject_id != principal.id {
            self.refresh_store.revoke_chain(record.chain_id);
            return Err(AuthError::invalid_token("refresh token is no longer valid"));
        }

        self.issue_pair(&principal, &record, &key)
    }

    /// Reports whether a token is active. Never fails.
    ///
    /// Refresh tokens are active only while the refresh store still
    /// considers them exchangeable.
    pub fn introspect(&self, token: &str) -> IntrospectionResponse {
        let keys = self.key_ring.public_key_set();
        match self.codec.verify_for_introspection(token, &keys) {
            Ok(verified) => match verified.claims {
                AnyClaims::Access(claims) => {
                    IntrospectionResponse::from_access(claims, verified.key_id)
                }
                AnyClaims::Refresh(claims) => {
                    let exchangeable = Uuid::parse_str(&claims.jti)
                        .is_ok_and(|id| self.refresh_store.is_valid(id));
                    if exchangeable {
                        IntrospectionResponse::from_refresh(claims, verified.key_id)
                    } else {
                        IntrospectionResponse::inactive()
                    }
                }
            },
            Err(e) => {
                debug!(error = %e, "Introspected token inactive");
                IntrospectionResponse::inactive()
            }
        }
    }

    /// Verifies an access token for an access decision.
    ///
    /// # Errors
    /// `InvalidToken` if the token fails any check.
    pub fn verify_access(&self, access_token: &str) -> AuthResult<AccessClaims> {
        let keys = self.key_ring.public_key_set();
        self.codec
            .verify::<AccessClaims>(access_token, &keys)
            .map(|v| v.claims)
            .map_err(|e| {
                debug!(error = %e, "Access token rejected");
                AuthError::from(e)
            })
    }

    /// Returns the identity carried by a valid access token.
    ///
    /// # Errors
    /// `InvalidToken` if the token fails any check.
    pub fn userinfo(&self, access_token: &str) -> AuthResult<UserInfo> {
        self.verify_access(access_token).map(UserInfo::from)
    }

    /// Revokes the rotation chain of a refresh token. Unknown or invalid
    /// tokens are ignored; returns whether anything was revoked.
    pub fn logout(&self, refresh_token: &str) -> bool {
        let keys = self.key_ring.public_key_set();
        // Expired tokens can still be logged out, within the grace window.
        let Ok(verified) = self.codec.verify_for_introspection(refresh_token, &keys) else {
            return false;
        };
        let AnyClaims::Refresh(claims) = verified.claims else {
            return false;
        };
        let revoked = Uuid::parse_str(&claims.jti).is_ok_and(|id| self.refresh_store.revoke(id));
        if revoked {
            info!(user_id = %claims.sub, chain_id = %claims.chain, "Refresh chain revoked by logout");
        }
        revoked
    }

    /// Registers a user through the credential store.
    ///
    /// # Errors
    /// `InvalidRequest` or `Conflict` from the store.
    pub async fn register(&self, new_user: NewUser) -> AuthResult<Principal> {
        self.credentials.register(new_user).await
    }

    /// Rotates the signing key, keeping the previous one published.
    ///
    /// # Errors
    /// `KeyGeneration` if key material cannot be produced; the ring is unchanged.
    pub fn rotate_signing_key(&self) -> AuthResult<String> {
        let key = self.key_ring.rotate()?;
        Ok(key.kid().to_string())
    }

    fn issue_pair(
        &self,
        principal: &Principal,
        record: &RefreshToken,
        key: &SigningKeyPair,
    ) -> AuthResult<TokenPair> {
        let grant = AccessGrant {
            subject: principal.id.clone(),
            username: principal.username.clone(),
            email: principal.email.clone(),
            roles: principal.roles.clone(),
            scopes: principal.scopes.clone(),
        };
        let access = self.codec.issue_access(&grant, key, self.access_ttl)?;
        let refresh = self.codec.issue_refresh(record, key)?;
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.as_secs(),
        })
    }
}

//! Refresh token record.
//!
//! The signed refresh token handed to clients only carries the record's
//! `token_id`; whether it can still be exchanged is decided here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// A refresh token as tracked by the refresh store.
///
/// Every successful rotation revokes the presented record and creates its
/// successor in the same rotation chain, so at most one record per chain
/// is exchangeable at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshToken {
    /// Unique identifier, carried as the token's `jti`.
    pub token_id: Uuid,

    /// Principal the token was issued to.
    pub subject_id: String,

    /// Lineage shared by all rotations of one login.
    pub chain_id: Uuid,

    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When this token was revoked (None = not revoked).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,

    /// Key that signed the token handed to the client.
    pub signing_key_id: String,
}

impl RefreshToken {
    /// Creates a new, unrevoked record.
    #[must_use]
    pub fn new(
        subject_id: impl Into<String>,
        signing_key_id: impl Into<String>,
        chain_id: Uuid,
        issued_at: OffsetDateTime,
        ttl: Duration,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            chain_id,
            issued_at,
            expires_at: issued_at
                .saturating_add(time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX)),
            revoked_at: None,
            signing_key_id: signing_key_id.into(),
        }
    }

    /// Returns `true` if this token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Returns `true` if this token can still be exchanged at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }
}

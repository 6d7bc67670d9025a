//! In-memory refresh token store with rotation chains and reuse detection.
//!
//! # Concurrency
//!
//! Records and chains live in two sharded maps. A rotation decides its
//! outcome while holding the presented record's shard guard, so two
//! concurrent rotations of the same token produce exactly one winner.
//!
//! Lock order is chain, then token. A token guard is never held while a
//! chain guard is taken.

use std::time::Duration;

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::RefreshToken;

/// Refresh store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// No record with this ID exists (never issued or already collected).
    #[error("Refresh token not found")]
    TokenNotFound,

    /// The record was already used or revoked. Its whole chain is now revoked.
    #[error("Refresh token reuse detected in chain {chain_id}")]
    TokenReused {
        /// The revoked rotation chain.
        chain_id: Uuid,
    },

    /// The record is past its expiry.
    #[error("Refresh token expired")]
    TokenExpired,
}

#[derive(Debug, Default)]
struct Chain {
    members: Vec<Uuid>,
    revoked: bool,
}

/// Tracks issued refresh tokens and their rotation chains.
#[derive(Debug)]
pub struct RefreshStore {
    tokens: DashMap<Uuid, RefreshToken>,
    chains: DashMap<Uuid, Chain>,
    ttl: Duration,
}

enum Decision {
    Rotate { chain_id: Uuid, subject_id: String },
    Reused { chain_id: Uuid },
    Expired,
}

impl RefreshStore {
    /// Creates a store issuing tokens valid for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            chains: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues the first token of a new rotation chain.
    pub fn issue(&self, subject_id: &str, signing_key_id: &str) -> RefreshToken {
        self.issue_at(subject_id, signing_key_id, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        subject_id: &str,
        signing_key_id: &str,
        now: OffsetDateTime,
    ) -> RefreshToken {
        let chain_id = Uuid::new_v4();
        let token = RefreshToken::new(subject_id, signing_key_id, chain_id, now, self.ttl);

        let mut chain = self.chains.entry(chain_id).or_default();
        self.tokens.insert(token.token_id, token.clone());
        chain.members.push(token.token_id);

        debug!(chain_id = %chain_id, subject = %subject_id, "Refresh chain started");
        token
    }

    /// Exchanges a token for its successor in the same chain.
    ///
    /// # Errors
    /// - `TokenNotFound` if no record exists for `old_token_id`
    /// - `TokenReused` if it was already used or revoked; the chain is revoked
    /// - `TokenExpired` if it is past its expiry
    pub fn rotate(
        &self,
        old_token_id: Uuid,
        signing_key_id: &str,
    ) -> Result<RefreshToken, RefreshError> {
        self.rotate_at(old_token_id, signing_key_id, OffsetDateTime::now_utc())
    }

    pub(crate) fn rotate_at(
        &self,
        old_token_id: Uuid,
        signing_key_id: &str,
        now: OffsetDateTime,
    ) -> Result<RefreshToken, RefreshError> {
        let decision = {
            let mut entry = self
                .tokens
                .get_mut(&old_token_id)
                .ok_or(RefreshError::TokenNotFound)?;
            let token = entry.value_mut();

            if token.is_revoked() {
                Decision::Reused {
                    chain_id: token.chain_id,
                }
            } else if token.is_expired_at(now) {
                Decision::Expired
            } else {
                token.revoked_at = Some(now);
                Decision::Rotate {
                    chain_id: token.chain_id,
                    subject_id: token.subject_id.clone(),
                }
            }
        };

        match decision {
            Decision::Expired => Err(RefreshError::TokenExpired),
            Decision::Reused { chain_id } => {
                warn!(
                    chain_id = %chain_id,
                    token_id = %old_token_id,
                    "Refresh token reuse detected, revoking chain"
                );
                self.revoke_chain(chain_id);
                Err(RefreshError::TokenReused { chain_id })
            }
            Decision::Rotate {
                chain_id,
                subject_id,
            } => {
                let Some(mut chain) = self.chains.get_mut(&chain_id) else {
                    return Err(RefreshError::TokenNotFound);
                };

                let mut successor =
                    RefreshToken::new(subject_id, signing_key_id, chain_id, now, self.ttl);
                // A replay revoked the chain after this rotation won; the
                // successor is born revoked so the chain stays dead.
                if chain.revoked {
                    successor.revoked_at = Some(now);
                }
                self.tokens.insert(successor.token_id, successor.clone());
                chain.members.push(successor.token_id);

                debug!(
                    chain_id = %chain_id,
                    old_token_id = %old_token_id,
                    new_token_id = %successor.token_id,
                    "Refresh token rotated"
                );
                Ok(successor)
            }
        }
    }

    /// Revokes every token in a chain. Idempotent.
    pub fn revoke_chain(&self, chain_id: Uuid) {
        let now = OffsetDateTime::now_utc();
        let Some(mut chain) = self.chains.get_mut(&chain_id) else {
            return;
        };
        chain.revoked = true;
        for id in &chain.members {
            if let Some(mut token) = self.tokens.get_mut(id) {
                token.revoked_at.get_or_insert(now);
            }
        }
    }

    /// Revokes the chain a token belongs to. Returns `false` for unknown tokens.
    pub fn revoke(&self, token_id: Uuid) -> bool {
        let chain_id = match self.tokens.get(&token_id) {
            Some(token) => token.chain_id,
            None => return false,
        };
        self.revoke_chain(chain_id);
        true
    }

    /// Returns `true` if the token exists, is unrevoked and unexpired.
    #[must_use]
    pub fn is_valid(&self, token_id: Uuid) -> bool {
        let now = OffsetDateTime::now_utc();
        self.tokens
            .get(&token_id)
            .is_some_and(|t| t.is_valid_at(now))
    }

    /// Returns a copy of a stored record.
    #[must_use]
    pub fn get(&self, token_id: Uuid) -> Option<RefreshToken> {
        self.tokens.get(&token_id).map(|t| t.clone())
    }

    /// Drops expired records and chains left without members. Returns the
    /// number of records removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(OffsetDateTime::now_utc())
    }

    pub(crate) fn cleanup_expired_at(&self, now: OffsetDateTime) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired_at(now));
        let removed = before.saturating_sub(self.tokens.len());

        self.chains.retain(|_, chain| {
            chain.members.retain(|id| self.tokens.contains_key(id));
            !chain.members.is_empty()
        });

        if removed > 0 {
            debug!(removed, "Expired refresh tokens collected");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

//! Signing key ring with lock-free reads.
//!
//! The ring holds exactly one active signing key plus any number of retired
//! keys that stay published for verification. Readers load an immutable
//! [`RingState`] snapshot through `ArcSwap`; rotation builds a new snapshot
//! and swaps it in, so token verification never waits on key generation.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::DecodingKey;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::info;

use super::keys::{Jwk, Jwks, KeyError, SigningAlgorithm, SigningKeyPair};
use crate::config::SigningConfig;

/// A verification key as published in the key set.
#[derive(Clone)]
pub struct PublishedKey {
    kid: String,
    algorithm: SigningAlgorithm,
    decoding_key: DecodingKey,
    jwk: Jwk,
}

impl PublishedKey {
    fn from_pair(pair: &SigningKeyPair) -> Self {
        Self {
            kid: pair.kid().to_string(),
            algorithm: pair.algorithm(),
            decoding_key: pair.decoding_key().clone(),
            jwk: pair.to_jwk(),
        }
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl std::fmt::Debug for PublishedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Ordered set of verification keys, newest first.
#[derive(Debug, Clone, Default)]
pub struct PublicKeySet {
    keys: Vec<PublishedKey>,
}

impl PublicKeySet {
    /// Builds a key set from a fetched JWKS document.
    ///
    /// Keys with an unsupported algorithm or incomplete components are
    /// rejected rather than skipped, so a broken document never silently
    /// shrinks the trusted set.
    ///
    /// # Errors
    /// Returns `InvalidKey` for the first key that cannot be used.
    pub fn from_jwks(jwks: &Jwks) -> Result<Self, KeyError> {
        let keys = jwks
            .keys
            .iter()
            .map(|jwk| {
                Ok(PublishedKey {
                    kid: jwk.kid.clone(),
                    algorithm: jwk.alg.parse()?,
                    decoding_key: jwk.decoding_key()?,
                    jwk: jwk.clone(),
                })
            })
            .collect::<Result<Vec<_>, KeyError>>()?;
        Ok(Self { keys })
    }

    /// Looks up a key by ID.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&PublishedKey> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.get(kid).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PublishedKey> {
        self.keys.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Exports the set as a JWKS document.
    #[must_use]
    pub fn to_jwks(&self) -> Jwks {
        Jwks {
            keys: self.keys.iter().map(|k| k.jwk.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct RetiredKey {
    pair: Arc<SigningKeyPair>,
    retired_at: OffsetDateTime,
}

/// Immutable snapshot swapped atomically on every change.
#[derive(Debug)]
struct RingState {
    active: Arc<SigningKeyPair>,
    retired: Vec<RetiredKey>,
    public: Arc<PublicKeySet>,
}

impl RingState {
    fn new(active: Arc<SigningKeyPair>, retired: Vec<RetiredKey>) -> Self {
        let keys = std::iter::once(&active)
            .chain(retired.iter().map(|r| &r.pair))
            .map(|pair| PublishedKey::from_pair(pair))
            .collect();
        Self {
            active,
            retired,
            public: Arc::new(PublicKeySet { keys }),
        }
    }
}

/// Holds the active signing key and the retired keys still published.
#[derive(Debug)]
pub struct KeyRing {
    algorithm: SigningAlgorithm,
    state: ArcSwap<RingState>,
    // Serializes writers; readers never take it.
    write_lock: Mutex<()>,
}

impl KeyRing {
    /// Creates a ring with a freshly generated active key.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if key material cannot be produced. Callers
    /// treat this as fatal at startup.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, KeyError> {
        let pair = SigningKeyPair::generate(algorithm)?;
        Ok(Self::with_key(pair))
    }

    /// Creates a ring around an existing key pair.
    #[must_use]
    pub fn with_key(pair: SigningKeyPair) -> Self {
        let algorithm = pair.algorithm();
        info!(key_id = %pair.kid(), algorithm = %algorithm, "Signing key loaded");
        Self {
            algorithm,
            state: ArcSwap::from_pointee(RingState::new(Arc::new(pair), Vec::new())),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a ring from signing configuration: loads the configured PEM
    /// files, or generates a key when no private key path is set.
    ///
    /// # Errors
    /// `InvalidKey` if a key file cannot be read or parsed, `KeyGeneration`
    /// if a fresh key cannot be produced.
    pub fn from_config(config: &SigningConfig) -> Result<Self, KeyError> {
        let Some(private_path) = &config.private_key_path else {
            return Self::generate(config.algorithm);
        };
        let read = |path: &std::path::Path| {
            std::fs::read_to_string(path)
                .map_err(|e| KeyError::invalid_key(format!("{}: {e}", path.display())))
        };
        let private_pem = read(private_path)?;
        let public_pem = config.public_key_path.as_deref().map(read).transpose()?;
        let pair = SigningKeyPair::from_pem(config.algorithm, &private_pem, public_pem.as_deref())?;
        Ok(Self::with_key(pair))
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Returns the key currently used for signing.
    #[must_use]
    pub fn active(&self) -> Arc<SigningKeyPair> {
        Arc::clone(&self.state.load().active)
    }

    /// Returns the published verification keys, active key first.
    #[must_use]
    pub fn public_key_set(&self) -> Arc<PublicKeySet> {
        Arc::clone(&self.state.load().public)
    }

    /// Generates a new key, makes it active and keeps the previous active
    /// key published for verification.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if key material cannot be produced; the ring
    /// is left unchanged and the rotation can be retried.
    pub fn rotate(&self) -> Result<Arc<SigningKeyPair>, KeyError> {
        let pair = SigningKeyPair::generate(self.algorithm)?;
        Ok(self.install(pair))
    }

    /// Makes `pair` the active key, retiring the current one.
    pub fn install(&self, pair: SigningKeyPair) -> Arc<SigningKeyPair> {
        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        let next = Arc::new(pair);

        let mut retired = Vec::with_capacity(current.retired.len() + 1);
        retired.push(RetiredKey {
            pair: Arc::clone(&current.active),
            retired_at: OffsetDateTime::now_utc(),
        });
        retired.extend(current.retired.iter().cloned());

        self.state
            .store(Arc::new(RingState::new(Arc::clone(&next), retired)));
        info!(
            key_id = %next.kid(),
            retired_key_id = %current.active.kid(),
            "Signing key rotated"
        );
        next
    }

    /// Withdraws a retired key from publication. Tokens signed with it stop
    /// verifying immediately.
    ///
    /// # Errors
    /// Returns `ActiveKey` for the active key and `KeyNotFound` for unknown IDs.
    pub fn remove(&self, kid: &str) -> Result<(), KeyError> {
        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        if current.active.kid() == kid {
            return Err(KeyError::ActiveKey {
                kid: kid.to_string(),
            });
        }
        if !current.retired.iter().any(|r| r.pair.kid() == kid) {
            return Err(KeyError::key_not_found(kid));
        }

        let retired = current
            .retired
            .iter()
            .filter(|r| r.pair.kid() != kid)
            .cloned()
            .collect();
        self.state.store(Arc::new(RingState::new(
            Arc::clone(&current.active),
            retired,
        )));
        info!(key_id = %kid, "Retired signing key withdrawn");
        Ok(())
    }

    /// Withdraws every retired key that was retired longer than `retention`
    /// ago. Returns the IDs removed.
    pub fn prune(&self, retention: Duration) -> Vec<String> {
        self.prune_at(retention, OffsetDateTime::now_utc())
    }

    pub(crate) fn prune_at(&self, retention: Duration, now: OffsetDateTime) -> Vec<String> {
        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        let (expired, kept): (Vec<_>, Vec<_>) = current
            .retired
            .iter()
            .cloned()
            .partition(|r| now - r.retired_at > retention);

        if expired.is_empty() {
            return Vec::new();
        }

        self.state
            .store(Arc::new(RingState::new(Arc::clone(&current.active), kept)));
        let removed: Vec<String> = expired.iter().map(|r| r.pair.kid().to_string()).collect();
        info!(removed = ?removed, "Pruned retired signing keys");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> KeyRing {
        KeyRing::generate(SigningAlgorithm::ES384).unwrap()
    }

    #[test]
    fn test_from_config_generates_without_paths() {
        let config = SigningConfig {
            algorithm: SigningAlgorithm::ES384,
            ..SigningConfig::default()
        };
        let ring = KeyRing::from_config(&config).unwrap();
        assert_eq!(ring.algorithm(), SigningAlgorithm::ES384);
    }

    #[test]
    fn test_from_config_loads_pem_file() {
        use p384::pkcs8::{EncodePrivateKey, LineEnding};

        let secret = p384::SecretKey::random(&mut rand::rngs::OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.pem");
        std::fs::write(&path, pem.as_bytes()).unwrap();

        let config = SigningConfig {
            algorithm: SigningAlgorithm::ES384,
            private_key_path: Some(path),
            ..SigningConfig::default()
        };
        let first = KeyRing::from_config(&config).unwrap();
        let second = KeyRing::from_config(&config).unwrap();
        // Same file, same thumbprint
        assert_eq!(first.active().kid(), second.active().kid());
    }

    #[test]
    fn test_from_config_missing_file() {
        let config = SigningConfig {
            algorithm: SigningAlgorithm::ES384,
            private_key_path: Some("/nonexistent/signing.pem".into()),
            ..SigningConfig::default()
        };
        let err = KeyRing::from_config(&config).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKey { .. }));
    }

    #[test]
    fn test_new_ring_publishes_active_key() {
        let ring = ring();
        let set = ring.public_key_set();
        assert_eq!(set.len(), 1);
        assert!(set.contains(ring.active().kid()));
    }

    #[test]
    fn test_rotate_keeps_previous_key_published() {
        let ring = ring();
        let first = ring.active();
        let second = ring.rotate().unwrap();

        assert_ne!(first.kid(), second.kid());
        assert_eq!(ring.active().kid(), second.kid());

        let set = ring.public_key_set();
        assert_eq!(set.len(), 2);
        // Active key first
        assert_eq!(set.iter().next().unwrap().kid(), second.kid());
        assert!(set.contains(first.kid()));
    }

    #[test]
    fn test_old_snapshot_survives_rotation() {
        let ring = ring();
        let before = ring.public_key_set();
        ring.rotate().unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(ring.public_key_set().len(), 2);
    }

    #[test]
    fn test_remove_retired_key() {
        let ring = ring();
        let first = ring.active();
        ring.rotate().unwrap();

        ring.remove(first.kid()).unwrap();
        assert!(!ring.public_key_set().contains(first.kid()));
        assert!(matches!(
            ring.remove(first.kid()),
            Err(KeyError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_active_key_is_refused() {
        let ring = ring();
        let active = ring.active();
        assert!(matches!(
            ring.remove(active.kid()),
            Err(KeyError::ActiveKey { .. })
        ));
    }

    #[test]
    fn test_prune_removes_only_old_retired_keys() {
        let ring = ring();
        let first = ring.active();
        ring.rotate().unwrap();

        assert!(ring.prune(Duration::from_secs(3600)).is_empty());

        let later = OffsetDateTime::now_utc() + time::Duration::hours(2);
        let removed = ring.prune_at(Duration::from_secs(3600), later);
        assert_eq!(removed, vec![first.kid().to_string()]);
        assert_eq!(ring.public_key_set().len(), 1);
    }

    #[test]
    fn test_public_key_set_from_jwks() {
        let ring = ring();
        ring.rotate().unwrap();
        let jwks = ring.public_key_set().to_jwks();

        let rebuilt = PublicKeySet::from_jwks(&jwks).unwrap();
        assert_eq!(rebuilt.len(), 2);
        for key in ring.public_key_set().iter() {
            assert!(rebuilt.contains(key.kid()));
        }
    }

    #[test]
    fn test_public_key_set_rejects_unknown_algorithm() {
        let mut jwks = ring().public_key_set().to_jwks();
        jwks.keys[0].alg = "HS256".into();
        assert!(PublicKeySet::from_jwks(&jwks).is_err());
    }
}

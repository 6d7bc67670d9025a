//! Background maintenance: key rotation and pruning, refresh store
//! cleanup, rate-limit bucket eviction, remote key refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tollgate_auth::{AuthConfig, AuthError, TokenAuthority};
use tollgate_gateway::RateLimiter;
use tracing::{debug, error, info};

/// Handles of running maintenance tasks. Aborts them all when dropped.
#[derive(Debug, Default)]
pub struct Maintenance {
    handles: Vec<JoinHandle<()>>,
}

impl Maintenance {
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Rotates the signing key, retrying after `retry_delay` until it works.
/// Returns the new key id.
pub async fn rotate_with_retry(authority: Arc<TokenAuthority>, retry_delay: Duration) -> String {
    loop {
        let attempt = Arc::clone(&authority);
        let result = tokio::task::spawn_blocking(move || attempt.rotate_signing_key())
            .await
            .unwrap_or_else(|e| Err(AuthError::internal(e.to_string())));
        match result {
            Ok(kid) => {
                info!(key_id = %kid, "Scheduled signing key rotation complete");
                return kid;
            }
            Err(e) => {
                error!(error = %e, retry_in = ?retry_delay, "Signing key rotation failed");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// Runs `rotate_with_retry` every `every`.
pub fn spawn_key_rotation(
    authority: Arc<TokenAuthority>,
    every: Duration,
    retry_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            rotate_with_retry(Arc::clone(&authority), retry_delay).await;
        }
    })
}

/// Drops retired keys whose tokens have all expired, and expired refresh
/// records, every `every`.
pub fn spawn_auth_cleanup(
    authority: Arc<TokenAuthority>,
    config: &AuthConfig,
    every: Duration,
) -> JoinHandle<()> {
    let retention = config.retired_key_retention();
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = authority.key_ring().prune(retention);
            let removed = authority.refresh_store().cleanup_expired();
            debug!(
                pruned_keys = pruned.len(),
                removed_refresh_tokens = removed,
                "Auth maintenance pass"
            );
        }
    })
}

/// Evicts idle rate-limit buckets.
pub fn spawn_bucket_eviction(limiter: Arc<RateLimiter>, idle: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(idle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.evict_idle(idle);
        }
    })
}

#[cfg(test)]
mod tests {
    use tollgate_auth::{InMemoryCredentialStore, KeyRing, SigningAlgorithm};
    use tollgate_gateway::RateLimitConfig;

    use super::*;

    fn authority() -> Arc<TokenAuthority> {
        let ring = Arc::new(KeyRing::generate(SigningAlgorithm::ES384).unwrap());
        Arc::new(TokenAuthority::new(
            &AuthConfig::default(),
            ring,
            Arc::new(InMemoryCredentialStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_rotate_with_retry_installs_new_key() {
        let authority = authority();
        let before = authority.key_ring().active().kid().to_string();

        let kid = rotate_with_retry(authority.clone(), Duration::from_millis(10)).await;
        assert_ne!(kid, before);
        assert_eq!(authority.key_ring().active().kid(), kid);
        assert!(authority.key_ring().public_key_set().contains(&before));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_eviction_runs_on_schedule() {
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::default()));
        limiter.allow("client");

        let handle = spawn_bucket_eviction(limiter.clone(), Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(limiter.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_maintenance_aborts_on_drop() {
        let handle = tokio::spawn(std::future::pending::<()>());
        let abort = handle.abort_handle();
        let mut maintenance = Maintenance::default();
        maintenance.push(handle);
        assert_eq!(maintenance.len(), 1);

        drop(maintenance);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }
}

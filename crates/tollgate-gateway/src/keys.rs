//! Where the gateway gets its verification keys.
//!
//! In a single process the gateway reads the authority's [`KeyRing`]
//! directly. Deployed separately, it polls the authority's JWKS endpoint
//! and swaps the fetched set in atomically. A token naming a key the
//! polled set lacks triggers an early re-fetch, rate limited by
//! `min_refetch_interval`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::time::Instant;
use tollgate_auth::{Jwks, KeyRing, PublicKeySet};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::GatewayError;

/// Default minimum spacing between fetches triggered by unknown key ids.
pub const DEFAULT_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(10);

/// Supplies the current set of published verification keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    fn public_key_set(&self) -> Arc<PublicKeySet>;

    /// Called when a token names `kid` and the current set lacks it.
    /// Returns the set to retry verification with.
    async fn refresh_for_unknown_kid(&self, _kid: &str) -> Arc<PublicKeySet> {
        self.public_key_set()
    }
}

#[async_trait]
impl KeySource for KeyRing {
    fn public_key_set(&self) -> Arc<PublicKeySet> {
        KeyRing::public_key_set(self)
    }
}

/// Key set fetched from a remote JWKS endpoint.
#[derive(Debug)]
pub struct RemoteKeySet {
    url: Url,
    client: reqwest::Client,
    keys: ArcSwap<PublicKeySet>,
    min_refetch_interval: Duration,
    last_fetch: parking_lot::Mutex<Instant>,
    // Coalesces concurrent unknown-kid fetches into one.
    refetch: tokio::sync::Mutex<()>,
}

impl RemoteKeySet {
    /// Fetches the key set once and returns the source.
    ///
    /// # Errors
    /// `KeySource` if the endpoint is unreachable or returns an unusable set.
    pub async fn fetch(url: Url, client: reqwest::Client) -> Result<Self, GatewayError> {
        let keys = download(&client, &url).await?;
        info!(url = %url, keys = keys.len(), "Fetched remote key set");
        Ok(Self {
            url,
            client,
            keys: ArcSwap::from_pointee(keys),
            min_refetch_interval: DEFAULT_MIN_REFETCH_INTERVAL,
            last_fetch: parking_lot::Mutex::new(Instant::now()),
            refetch: tokio::sync::Mutex::new(()),
        })
    }

    /// Sets the minimum spacing between fetches caused by unknown key ids.
    #[must_use]
    pub fn with_min_refetch_interval(mut self, interval: Duration) -> Self {
        self.min_refetch_interval = interval;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Re-fetches the key set. On failure the previous set stays in place.
    ///
    /// # Errors
    /// `KeySource` if the fetch fails.
    pub async fn refresh(&self) -> Result<usize, GatewayError> {
        *self.last_fetch.lock() = Instant::now();
        let keys = download(&self.client, &self.url).await?;
        let count = keys.len();
        let previous = self.keys.swap(Arc::new(keys));
        if previous.len() != count {
            info!(url = %self.url, before = previous.len(), after = count, "Remote key set changed");
        } else {
            debug!(url = %self.url, keys = count, "Remote key set refreshed");
        }
        Ok(count)
    }

    /// Polls the endpoint every `interval` until the task is aborted.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(url = %self.url, error = %e, "Remote key set refresh failed; keeping previous keys");
                }
            }
        })
    }
}

#[async_trait]
impl KeySource for RemoteKeySet {
    fn public_key_set(&self) -> Arc<PublicKeySet> {
        self.keys.load_full()
    }

    async fn refresh_for_unknown_kid(&self, kid: &str) -> Arc<PublicKeySet> {
        let _guard = self.refetch.lock().await;
        let current = self.keys.load_full();
        if current.contains(kid) {
            return current;
        }
        if self.last_fetch.lock().elapsed() < self.min_refetch_interval {
            debug!(url = %self.url, kid = %kid, "Unknown key id, re-fetch suppressed");
            return current;
        }
        debug!(url = %self.url, kid = %kid, "Unknown key id, re-fetching key set");
        if let Err(e) = self.refresh().await {
            warn!(url = %self.url, error = %e, "Key set re-fetch failed; keeping previous keys");
        }
        self.keys.load_full()
    }
}

async fn download(client: &reqwest::Client, url: &Url) -> Result<PublicKeySet, GatewayError> {
    let key_source = |message: String| GatewayError::KeySource { message };

    let jwks: Jwks = client
        .get(url.clone())
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| key_source(format!("fetching {url}: {e}")))?
        .json()
        .await
        .map_err(|e| key_source(format!("decoding {url}: {e}")))?;

    let keys = PublicKeySet::from_jwks(&jwks).map_err(|e| key_source(e.to_string()))?;
    if keys.is_empty() {
        return Err(key_source(format!("{url} published no usable keys")));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use tollgate_auth::SigningAlgorithm;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn serve_jwks(server: &MockServer, ring: &KeyRing) {
        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.public_key_set().to_jwks()))
            .mount(server)
            .await;
    }

    fn jwks_url(server: &MockServer) -> Url {
        Url::parse(&format!("{}/.well-known/jwks.json", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_and_refresh_follow_rotation() {
        let server = MockServer::start().await;
        let ring = KeyRing::generate(SigningAlgorithm::ES384).unwrap();
        serve_jwks(&server, &ring).await;

        let remote = RemoteKeySet::fetch(jwks_url(&server), reqwest::Client::new())
            .await
            .unwrap();
        assert!(remote.public_key_set().contains(ring.active().kid()));

        let rotated = ring.rotate().unwrap();
        serve_jwks(&server, &ring).await;
        assert_eq!(remote.refresh().await.unwrap(), 2);
        assert!(remote.public_key_set().contains(rotated.kid()));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_keys() {
        let server = MockServer::start().await;
        let ring = KeyRing::generate(SigningAlgorithm::ES384).unwrap();
        serve_jwks(&server, &ring).await;
        let remote = RemoteKeySet::fetch(jwks_url(&server), reqwest::Client::new())
            .await
            .unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(matches!(
            remote.refresh().await,
            Err(GatewayError::KeySource { .. })
        ));
        assert!(remote.public_key_set().contains(ring.active().kid()));
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_refetch() {
        let server = MockServer::start().await;
        let ring = KeyRing::generate(SigningAlgorithm::ES384).unwrap();
        serve_jwks(&server, &ring).await;
        let remote = RemoteKeySet::fetch(jwks_url(&server), reqwest::Client::new())
            .await
            .unwrap()
            .with_min_refetch_interval(Duration::ZERO);

        let rotated = ring.rotate().unwrap();
        serve_jwks(&server, &ring).await;
        assert!(!remote.public_key_set().contains(rotated.kid()));

        let keys = remote.refresh_for_unknown_kid(rotated.kid()).await;
        assert!(keys.contains(rotated.kid()));
        assert!(remote.public_key_set().contains(rotated.kid()));
    }

    #[tokio::test]
    async fn test_unknown_kid_refetch_is_rate_limited() {
        let server = MockServer::start().await;
        let ring = KeyRing::generate(SigningAlgorithm::ES384).unwrap();
        serve_jwks(&server, &ring).await;
        let remote = RemoteKeySet::fetch(jwks_url(&server), reqwest::Client::new())
            .await
            .unwrap()
            .with_min_refetch_interval(Duration::from_secs(3600));

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ring.public_key_set().to_jwks()))
            .expect(0)
            .mount(&server)
            .await;

        for _ in 0..3 {
            let keys = remote.refresh_for_unknown_kid("no-such-key").await;
            assert_eq!(keys.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_empty_key_set_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "keys": [] })))
            .mount(&server)
            .await;

        let err = RemoteKeySet::fetch(jwks_url(&server), reqwest::Client::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::KeySource { .. }));
    }
}

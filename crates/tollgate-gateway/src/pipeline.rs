//! The per-request admission pipeline.
//!
//! Stages run in order and stop at the first failure:
//!
//! 1. rate limit by client key
//! 2. bearer token verification against the published keys
//! 3. route lookup
//! 4. forward through the upstream's circuit breaker
//!
//! A request rejected at one stage leaves no trace in later ones: a
//! rate-limited request is never verified, and an unauthenticated request
//! never touches a breaker.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{HeaderMap, Request, header},
    response::Response,
};
use tollgate_auth::middleware::bearer_token;
use tollgate_auth::{AccessClaims, TokenCodec, TokenError};
use tracing::{debug, warn};

use crate::circuit_breaker::{BreakerError, BreakerRegistry};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::keys::KeySource;
use crate::proxy::{OutboundRequest, UpstreamClient, is_unavailable_status};
use crate::rate_limit::RateLimiter;
use crate::router::RouteTable;

pub struct GatewayPipeline {
    limiter: Arc<RateLimiter>,
    codec: TokenCodec,
    keys: Arc<dyn KeySource>,
    routes: RouteTable,
    breakers: BreakerRegistry,
    client: UpstreamClient,
    body_limit: usize,
}

impl GatewayPipeline {
    /// Builds the pipeline. `codec` must carry the authority's issuer.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        codec: TokenCodec,
        keys: Arc<dyn KeySource>,
        client: UpstreamClient,
    ) -> Self {
        let routes = RouteTable::new(&config.routes, config.upstream_timeout);
        let breakers = BreakerRegistry::with_upstreams(config.circuit_breaker, routes.upstreams());
        Self {
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            codec,
            keys,
            routes,
            breakers,
            client,
            body_limit: config.body_limit_bytes,
        }
    }

    /// The limiter, shared with the idle-eviction task.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Verifies a bearer token against the current key set. A token naming
    /// an unknown key gets one retry after the key source refreshes.
    ///
    /// # Errors
    /// `Unauthorized` for a missing or unverifiable token.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AccessClaims, GatewayError> {
        let token = bearer_token(headers)
            .ok_or_else(|| GatewayError::unauthorized("missing bearer token"))?;
        let keys = self.keys.public_key_set();
        let verified = match self.codec.verify::<AccessClaims>(token, &keys) {
            Err(TokenError::UnknownKeyId { kid }) => {
                let keys = self.keys.refresh_for_unknown_kid(&kid).await;
                self.codec.verify::<AccessClaims>(token, &keys)
            }
            other => other,
        };
        let verified = verified.map_err(|e| {
            debug!(error = %e, "Gateway rejected bearer token");
            GatewayError::from(e)
        })?;
        Ok(verified.claims)
    }

    /// Runs a request through every stage.
    ///
    /// # Errors
    /// The first stage failure; upstream error statuses are returned as
    /// responses, not errors.
    pub async fn handle(
        &self,
        client_key: &str,
        request: Request<Body>,
    ) -> Result<Response, GatewayError> {
        self.limiter.check(client_key).map_err(|retry_after| {
            debug!(client = %client_key, ?retry_after, "Request rate limited");
            GatewayError::RateLimited { retry_after }
        })?;

        let claims = self.authenticate(request.headers()).await?;

        let path = request.uri().path().to_string();
        let route = self
            .routes
            .find(&path)
            .ok_or_else(|| GatewayError::RouteNotFound { path: path.clone() })?;

        let (parts, body) = request.into_parts();
        let declared_len = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_len.is_some_and(|len| len > self.body_limit) {
            return Err(GatewayError::PayloadTooLarge);
        }
        let body = to_bytes(body, self.body_limit)
            .await
            .map_err(|e| GatewayError::BadRequest {
                message: format!("failed to read request body: {e}"),
            })?;

        let outbound = OutboundRequest::new(
            route,
            parts.method,
            &path,
            parts.uri.query(),
            &parts.headers,
            body,
            &claims,
        );

        let upstream = route.upstream().to_string();
        let breaker = self.breakers.get(&upstream);
        let client = self.client.clone();
        let timeout = route.timeout();
        debug!(upstream = %upstream, subject = %claims.sub, "Forwarding request");

        breaker
            .guard_with(
                async move { client.send(outbound, timeout).await },
                |result| matches!(result, Ok(response) if !is_unavailable_status(response.status())),
            )
            .await
            .map_err(|e| match e {
                BreakerError::Open { retry_after } => {
                    debug!(upstream = %upstream, "Circuit open, request rejected");
                    GatewayError::CircuitOpen {
                        upstream,
                        retry_after,
                    }
                }
                BreakerError::Inner(source) => {
                    warn!(upstream = %upstream, error = %source, "Upstream call failed");
                    GatewayError::Upstream { upstream, source }
                }
                BreakerError::Aborted => {
                    GatewayError::internal(format!("call to {upstream} did not complete"))
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::http::StatusCode;
    use tollgate_auth::{AccessGrant, KeyRing, PublicKeySet, SigningAlgorithm};
    use tollgate_auth::error::INVALID_TOKEN_DESCRIPTION;
    use url::Url;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    use super::*;
    use crate::config::{CircuitBreakerConfig, RateLimitConfig, RouteConfig};

    const ISSUER: &str = "http://localhost:8080";

    struct Fixture {
        pipeline: GatewayPipeline,
        ring: Arc<KeyRing>,
        codec: TokenCodec,
    }

    fn fixture(upstream_url: &str, capacity: u32, threshold: u32) -> Fixture {
        let config = GatewayConfig {
            rate_limit: RateLimitConfig {
                capacity,
                refill_per_second: 1.0,
                idle_eviction: Duration::from_secs(60),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(30),
            },
            upstream_timeout: Duration::from_secs(2),
            routes: vec![RouteConfig {
                prefix: "/orders".into(),
                upstream: "orders".into(),
                url: Url::parse(upstream_url).unwrap(),
                timeout: None,
                strip_prefix: false,
                forward_authorization: true,
            }],
            ..GatewayConfig::default()
        };
        let ring = Arc::new(KeyRing::generate(SigningAlgorithm::ES384).unwrap());
        let codec = TokenCodec::new(ISSUER);
        let pipeline = GatewayPipeline::new(
            &config,
            codec.clone(),
            ring.clone(),
            UpstreamClient::default(),
        );
        Fixture {
            pipeline,
            ring,
            codec,
        }
    }

    impl Fixture {
        fn token(&self, ttl: Duration) -> String {
            let grant = AccessGrant {
                subject: "user-1".into(),
                username: "alice".into(),
                email: "alice@example.com".into(),
                roles: ["user".to_string()].into(),
                scopes: ["read".to_string()].into(),
            };
            self.codec
                .issue_access(&grant, &self.ring.active(), ttl)
                .unwrap()
                .token
        }
    }

    fn request(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Counts calls so tests can assert an upstream was never reached.
    struct Counting(Arc<AtomicUsize>, u16);

    impl Respond for Counting {
        fn respond(&self, _: &wiremock::Request) -> ResponseTemplate {
            self.0.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(self.1).set_body_json(serde_json::json!({ "orders": [] }))
        }
    }

    async fn upstream(status: u16) -> (MockServer, Arc<AtomicUsize>) {
        let server = MockServer::start().await;
        let hits = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .respond_with(Counting(hits.clone(), status))
            .mount(&server)
            .await;
        (server, hits)
    }

    #[tokio::test]
    async fn test_authenticated_request_is_forwarded() {
        let (server, hits) = upstream(200).await;
        let fx = fixture(&server.uri(), 10, 3);
        let token = fx.token(Duration::from_secs(60));

        let response = fx
            .pipeline
            .handle("client", request("/orders/1", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_and_expired_tokens_are_unauthorized() {
        let (server, hits) = upstream(200).await;
        let fx = fixture(&server.uri(), 10, 3);

        let err = fx
            .pipeline
            .handle("client", request("/orders", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized { .. }));

        let expired = fx.codec.sign(
            &serde_json::json!({
                "iss": ISSUER, "sub": "user-1", "username": "alice", "email": "a@b.c",
                "roles": [], "scopes": [], "type": "access",
                "iat": 1_000, "exp": 2_000, "jti": "x"
            }),
            &fx.ring.active(),
        );
        let err = fx
            .pipeline
            .handle("client", request("/orders", Some(&expired.unwrap())))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Unauthorized { ref message } if message == INVALID_TOKEN_DESCRIPTION
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_runs_before_authentication() {
        let (server, _) = upstream(200).await;
        let fx = fixture(&server.uri(), 2, 3);

        for _ in 0..2 {
            let err = fx.pipeline.handle("client", request("/orders", None)).await;
            assert!(matches!(err, Err(GatewayError::Unauthorized { .. })));
        }
        let err = fx
            .pipeline
            .handle("client", request("/orders", None))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (server, _) = upstream(200).await;
        let fx = fixture(&server.uri(), 10, 3);
        let token = fx.token(Duration::from_secs(60));

        let err = fx
            .pipeline
            .handle("client", request("/billing", Some(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_upstream_status_opens_circuit() {
        let (server, hits) = upstream(503).await;
        let fx = fixture(&server.uri(), 10, 3);
        let token = fx.token(Duration::from_secs(60));

        for _ in 0..3 {
            let response = fx
                .pipeline
                .handle("client", request("/orders", Some(&token)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        let err = fx
            .pipeline
            .handle("client", request("/orders", Some(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_application_error_is_passed_through_without_tripping() {
        let (server, hits) = upstream(500).await;
        let fx = fixture(&server.uri(), 10, 1);
        let token = fx.token(Duration::from_secs(60));

        for _ in 0..3 {
            let response = fx
                .pipeline
                .handle("client", request("/orders", Some(&token)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_opens_circuit() {
        let fx = fixture("http://127.0.0.1:9", 10, 2);
        let token = fx.token(Duration::from_secs(60));

        for _ in 0..2 {
            let err = fx
                .pipeline
                .handle("client", request("/orders", Some(&token)))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Upstream { .. }));
        }
        let err = fx
            .pipeline
            .handle("client", request("/orders", Some(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    /// Serves a stale set until asked about an unknown key id.
    struct StaleKeys {
        stale: Arc<PublicKeySet>,
        ring: Arc<KeyRing>,
        refreshes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl KeySource for StaleKeys {
        fn public_key_set(&self) -> Arc<PublicKeySet> {
            self.stale.clone()
        }

        async fn refresh_for_unknown_kid(&self, _kid: &str) -> Arc<PublicKeySet> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.ring.public_key_set()
        }
    }

    #[tokio::test]
    async fn test_unknown_kid_is_retried_after_key_refresh() {
        let (server, hits) = upstream(200).await;
        let fx = fixture(&server.uri(), 10, 3);
        let stale = fx.ring.public_key_set();
        fx.ring.rotate().unwrap();
        let token = fx.token(Duration::from_secs(60));

        let keys = Arc::new(StaleKeys {
            stale,
            ring: fx.ring.clone(),
            refreshes: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            routes: vec![RouteConfig {
                prefix: "/orders".into(),
                upstream: "orders".into(),
                url: Url::parse(&server.uri()).unwrap(),
                timeout: None,
                strip_prefix: false,
                forward_authorization: true,
            }],
            ..GatewayConfig::default()
        };
        let pipeline = GatewayPipeline::new(
            &config,
            fx.codec.clone(),
            keys.clone(),
            UpstreamClient::default(),
        );

        let response = pipeline
            .handle("client", request("/orders", Some(&token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(keys.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_signed_by_unpublished_key_is_rejected() {
        let (server, _) = upstream(200).await;
        let fx = fixture(&server.uri(), 10, 3);
        let token = fx.token(Duration::from_secs(60));
        let old = fx.ring.active().kid().to_string();

        fx.ring.rotate().unwrap();
        assert!(
            fx.pipeline
                .handle("client", request("/orders", Some(&token)))
                .await
                .is_ok()
        );

        fx.ring.remove(&old).unwrap();
        let err = fx
            .pipeline
            .handle("client", request("/orders", Some(&token)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthorized { .. }));
    }
}

//! Gateway configuration.
//!
//! ```toml
//! [gateway]
//! upstream_timeout = "30s"
//!
//! [gateway.rate_limit]
//! capacity = 60
//! refill_per_second = 1.0
//!
//! [gateway.circuit_breaker]
//! failure_threshold = 5
//! cooldown = "30s"
//!
//! [[gateway.routes]]
//! prefix = "/api/v1/orders"
//! upstream = "orders"
//! url = "http://orders.internal:8080"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default timeout for a forwarded call, including reading the body.
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Take verification keys from this JWKS URL instead of the local ring.
    pub jwks_url: Option<Url>,

    #[serde(with = "humantime_serde")]
    pub jwks_refresh_interval: Duration,

    /// Minimum spacing between early fetches caused by unknown key ids.
    #[serde(with = "humantime_serde")]
    pub jwks_min_refetch_interval: Duration,

    /// Maximum accepted request body.
    pub body_limit_bytes: usize,

    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            upstream_timeout: Duration::from_secs(30),
            jwks_url: None,
            jwks_refresh_interval: Duration::from_secs(300),
            jwks_min_refetch_interval: crate::keys::DEFAULT_MIN_REFETCH_INTERVAL,
            body_limit_bytes: 10 * 1024 * 1024,
            routes: Vec::new(),
        }
    }
}

/// Token bucket settings, applied per client.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity (burst size).
    pub capacity: u32,

    /// Tokens added per second.
    pub refill_per_second: f64,

    /// Buckets untouched for this long are dropped.
    #[serde(with = "humantime_serde")]
    pub idle_eviction: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            refill_per_second: 1.0,
            idle_eviction: Duration::from_secs(600),
        }
    }
}

/// Per-upstream breaker settings.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before admitting a probe.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// A path prefix served by an upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix, e.g. `/api/v1/orders`.
    pub prefix: String,

    /// Upstream identifier. Routes sharing an identifier share a breaker.
    pub upstream: String,

    /// Base URL of the upstream.
    pub url: Url,

    /// Overrides `upstream_timeout` for this route.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Remove the prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Pass the caller's `Authorization` header through.
    #[serde(default = "default_true")]
    pub forward_authorization: bool,
}

fn default_true() -> bool {
    true
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("Invalid gateway configuration: {0}")]
    InvalidValue(String),
}

impl GatewayConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatewayConfigError::InvalidValue` if:
    /// - The bucket capacity or refill rate is not positive
    /// - The breaker threshold or cooldown is zero
    /// - A timeout or interval is zero
    /// - A route prefix does not start with `/`, or is declared twice
    /// - A route URL is not http(s)
    pub fn validate(&self) -> Result<(), GatewayConfigError> {
        let invalid = |msg: String| Err(GatewayConfigError::InvalidValue(msg));

        if self.rate_limit.capacity == 0 {
            return invalid("rate_limit.capacity must be > 0".into());
        }
        if !(self.rate_limit.refill_per_second.is_finite()
            && self.rate_limit.refill_per_second > 0.0)
        {
            return invalid("rate_limit.refill_per_second must be > 0".into());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be > 0".into());
        }
        if self.circuit_breaker.cooldown.is_zero() {
            return invalid("circuit_breaker.cooldown must be > 0".into());
        }
        if self.upstream_timeout.is_zero() || self.jwks_refresh_interval.is_zero() {
            return invalid("upstream_timeout and jwks_refresh_interval must be > 0".into());
        }

        let mut seen = std::collections::HashSet::new();
        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return invalid(format!("route prefix '{}' must start with '/'", route.prefix));
            }
            if !seen.insert(route.prefix.trim_end_matches('/')) {
                return invalid(format!("route prefix '{}' declared twice", route.prefix));
            }
            if !matches!(route.url.scheme(), "http" | "https") {
                return invalid(format!("route url '{}' must be http(s)", route.url));
            }
            if route.upstream.is_empty() {
                return invalid(format!("route '{}' has no upstream id", route.prefix));
            }
            if route.timeout.is_some_and(|t| t.is_zero()) {
                return invalid(format!("route '{}' timeout must be > 0", route.prefix));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(prefix: &str) -> RouteConfig {
        RouteConfig {
            prefix: prefix.into(),
            upstream: "orders".into(),
            url: Url::parse("http://localhost:9000").unwrap(),
            timeout: None,
            strip_prefix: false,
            forward_authorization: true,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_route_from_toml_like_json() {
        let config: GatewayConfig = serde_json::from_value(serde_json::json!({
            "rate_limit": { "capacity": 5, "refill_per_second": 1.0 },
            "circuit_breaker": { "cooldown": "10s" },
            "routes": [
                { "prefix": "/orders", "upstream": "orders", "url": "http://orders:80", "timeout": "2s" }
            ]
        }))
        .unwrap();

        assert_eq!(config.rate_limit.capacity, 5);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(10));
        assert_eq!(config.routes[0].timeout, Some(Duration::from_secs(2)));
        assert!(config.routes[0].forward_authorization);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = GatewayConfig::default();
        config.rate_limit.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.routes = vec![route("orders")];
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.routes = vec![route("/orders"), route("/orders/")];
        assert!(config.validate().is_err());
    }
}

//! # tollgate-gateway
//!
//! Admission pipeline in front of protected services.
//!
//! Every request passes, in order, a per-client token bucket, bearer token
//! verification against the authority's published keys, a route lookup and
//! the target upstream's circuit breaker before it is forwarded.
//!
//! ## Modules
//!
//! - [`rate_limit`] - Per-client token buckets
//! - [`circuit_breaker`] - Per-upstream breakers and their registry
//! - [`router`] - Longest-prefix route table
//! - [`proxy`] - Request forwarding and header filtering
//! - [`keys`] - Local and remote verification key sources
//! - [`pipeline`] - The stage sequence
//! - [`handler`] - Axum fallback handler

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod handler;
pub mod keys;
pub mod pipeline;
pub mod proxy;
pub mod rate_limit;
pub mod router;

pub use circuit_breaker::{BreakerError, BreakerRegistry, CircuitBreaker, CircuitState};
pub use config::{
    CircuitBreakerConfig, GatewayConfig, GatewayConfigError, RateLimitConfig, RouteConfig,
};
pub use error::{GatewayError, UpstreamError};
pub use handler::{gateway_handler, router};
pub use keys::{KeySource, RemoteKeySet};
pub use pipeline::GatewayPipeline;
pub use proxy::UpstreamClient;
pub use rate_limit::RateLimiter;
pub use router::{Route, RouteTable};

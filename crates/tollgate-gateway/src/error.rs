//! Gateway errors and their HTTP responses.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tollgate_auth::TokenError;
use tollgate_auth::error::INVALID_TOKEN_DESCRIPTION;
use tollgate_auth::middleware::REALM;

/// Failure of a forwarded call. Together with the statuses matched by
/// [`is_unavailable_status`](crate::proxy::is_unavailable_status), these
/// count against an upstream's breaker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot connect to upstream: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Transport(String),
}

/// Errors surfaced by the gateway pipeline.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("authentication required: {message}")]
    Unauthorized { message: String },

    #[error("no route for {path}")]
    RouteNotFound { path: String },

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("upstream {upstream} unavailable")]
    CircuitOpen {
        upstream: String,
        retry_after: Duration,
    },

    #[error("upstream {upstream}: {source}")]
    Upstream {
        upstream: String,
        #[source]
        source: UpstreamError,
    },

    #[error("key source error: {message}")]
    KeySource { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream {
                source: UpstreamError::Timeout(_),
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::KeySource { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "invalid_token",
            Self::RouteNotFound { .. } => "not_found",
            Self::PayloadTooLarge => "payload_too_large",
            Self::BadRequest { .. } => "invalid_request",
            Self::CircuitOpen { .. } => "service_unavailable",
            Self::Upstream { .. } => "upstream_error",
            Self::KeySource { .. } | Self::Internal { .. } => "server_error",
        }
    }

    /// Retry hint, rounded up to whole seconds.
    #[must_use]
    pub fn retry_after(&self) -> Option<u64> {
        let wait = match self {
            Self::RateLimited { retry_after } | Self::CircuitOpen { retry_after, .. } => {
                *retry_after
            }
            _ => return None,
        };
        let secs = wait.as_secs().saturating_add(u64::from(wait.subsec_nanos() > 0));
        Some(secs.max(1))
    }
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encoding { message } => Self::Internal { message },
            _ => Self::unauthorized(INVALID_TOKEN_DESCRIPTION),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let description = match &self {
            Self::Unauthorized { message } => message.clone(),
            Self::Upstream { upstream, .. } => format!("upstream {upstream} failed"),
            _ if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE => {
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (
            status,
            Json(json!({ "error": self.code(), "error_description": description })),
        )
            .into_response();
        let headers = response.headers_mut();

        if let Some(secs) = self.retry_after() {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if let Self::Unauthorized { message } = &self {
            let challenge = format!(
                "Bearer realm=\"{REALM}\", error=\"invalid_token\", error_description=\"{message}\""
            );
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

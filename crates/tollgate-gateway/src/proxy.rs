//! Forwards admitted requests to upstream services.

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::Response,
};
use tollgate_auth::AccessClaims;
use tracing::{debug, instrument, warn};

use crate::error::UpstreamError;
use crate::router::Route;

/// Header carrying the verified subject id to upstreams.
pub const SUBJECT_HEADER: &str = "x-authenticated-subject";
/// Comma-separated roles of the verified caller.
pub const ROLES_HEADER: &str = "x-authenticated-roles";
/// Space-separated scopes of the verified caller.
pub const SCOPES_HEADER: &str = "x-authenticated-scopes";

/// Upstream statuses that mean the service behind the route is down. They
/// are returned to the caller unchanged but count as breaker failures.
#[must_use]
pub fn is_unavailable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// A request ready to be sent upstream. Owns everything it needs so the
/// send can run on a detached task.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Builds the upstream request for `route`: hop-by-hop headers and any
    /// client-supplied identity headers are dropped, then the verified
    /// identity is attached.
    pub fn new(
        route: &Route,
        method: Method,
        path: &str,
        query: Option<&str>,
        incoming: &HeaderMap,
        body: Bytes,
        claims: &AccessClaims,
    ) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in incoming {
            if is_hop_by_hop_header(name) || is_identity_header(name) {
                continue;
            }
            if name == header::AUTHORIZATION && !route.forward_authorization() {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        let identity = [
            (SUBJECT_HEADER, claims.sub.clone()),
            (ROLES_HEADER, join(&claims.roles, ",")),
            (SCOPES_HEADER, join(&claims.scopes, " ")),
        ];
        for (name, value) in identity {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(_) => warn!(header = name, "Identity value is not a valid header value"),
            }
        }

        Self {
            method,
            url: route.target_url(path, query),
            headers,
            body,
        }
    }
}

fn join(values: &std::collections::BTreeSet<String>, separator: &str) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(separator)
}

/// HTTP client for upstream calls.
#[derive(Debug, Clone, Default)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Sends `request` and buffers the response. The timeout covers both
    /// the send and reading the body.
    ///
    /// Any HTTP status is returned as a response; only transport failures
    /// and timeouts are errors.
    ///
    /// # Errors
    /// `Timeout`, `Connect` or `Transport`.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn send(
        &self,
        request: OutboundRequest,
        timeout: std::time::Duration,
    ) -> Result<Response, UpstreamError> {
        let call = async {
            let upstream = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await
                .map_err(classify)?;

            let status = upstream.status();
            let headers = upstream.headers().clone();
            let body = upstream.bytes().await.map_err(classify)?;
            Ok::<_, UpstreamError>((status, headers, body))
        };

        let (status, headers, body) = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))??;
        debug!(status = %status, bytes = body.len(), "Upstream responded");

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        for (name, value) in &headers {
            if !is_hop_by_hop_header(name) && name != header::CONTENT_LENGTH {
                response.headers_mut().append(name.clone(), value.clone());
            }
        }
        Ok(response)
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_connect() {
        UpstreamError::Connect(err.to_string())
    } else {
        UpstreamError::Transport(err.to_string())
    }
}

/// Checks if a header is a hop-by-hop header that should not be forwarded
/// (RFC 9110 section 7.6.1). `Host` is set by the client for the target.
fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

fn is_identity_header(name: &HeaderName) -> bool {
    name.as_str().starts_with("x-authenticated-")
}

//! Axum entry point for gateway traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
};

use crate::error::GatewayError;
use crate::pipeline::GatewayPipeline;

/// Bucket key for requests whose peer address is unknown.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Rate-limit key for a request: the peer IP when the server was started
/// with connect info.
pub fn client_key(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}

/// Fallback handler running every unmatched request through the pipeline.
pub async fn gateway_handler(
    State(pipeline): State<Arc<GatewayPipeline>>,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let key = client_key(&request);
    pipeline.handle(&key, request).await
}

/// Router sending every request to the gateway.
pub fn router(pipeline: Arc<GatewayPipeline>) -> Router {
    Router::new().fallback(gateway_handler).with_state(pipeline)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use tollgate_auth::{KeyRing, SigningAlgorithm, TokenCodec};
    use tower::ServiceExt;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::proxy::UpstreamClient;

    #[test]
    fn test_client_key_from_connect_info() {
        let mut request = Request::get("/").body(Body::empty()).unwrap();
        assert_eq!(client_key(&request), ANONYMOUS_CLIENT);

        let addr: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_key(&request), "10.1.2.3");
    }

    #[tokio::test]
    async fn test_unauthenticated_request_gets_401() {
        let ring = Arc::new(KeyRing::generate(SigningAlgorithm::ES384).unwrap());
        let pipeline = GatewayPipeline::new(
            &GatewayConfig::default(),
            TokenCodec::new("http://localhost:8080"),
            ring,
            UpstreamClient::default(),
        );

        let response = router(Arc::new(pipeline))
            .oneshot(Request::get("/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }
}

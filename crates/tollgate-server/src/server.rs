use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tollgate_auth::{AuthState, InMemoryCredentialStore, KeyRing, TokenAuthority};
use tollgate_gateway::{GatewayPipeline, KeySource, RemoteKeySet, UpstreamClient};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::bootstrap::bootstrap_users;
use crate::config::AppConfig;
use crate::tasks::{self, Maintenance};

/// Shared components behind the HTTP surface.
#[derive(Clone)]
pub struct Services {
    pub authority: Arc<TokenAuthority>,
    pub auth_state: AuthState,
    pub pipeline: Arc<GatewayPipeline>,
    pub remote_keys: Option<Arc<RemoteKeySet>>,
}

impl Services {
    /// Builds every component from configuration and creates bootstrap
    /// users. Key generation failure is fatal here.
    pub async fn build(cfg: &AppConfig) -> anyhow::Result<Self> {
        let signing = cfg.auth.signing.clone();
        let key_ring = tokio::task::spawn_blocking(move || KeyRing::from_config(&signing))
            .await??;
        let key_ring = Arc::new(key_ring);

        let credentials = Arc::new(InMemoryCredentialStore::new());
        bootstrap_users(credentials.as_ref(), &cfg.bootstrap.users).await?;

        let auth_config = Arc::new(cfg.auth.clone());
        let authority = Arc::new(TokenAuthority::new(
            &auth_config,
            Arc::clone(&key_ring),
            credentials,
        ));
        let auth_state = AuthState::new(Arc::clone(&authority), auth_config);

        let http = reqwest::Client::builder().build()?;
        let remote_keys = match &cfg.gateway.jwks_url {
            Some(url) => Some(Arc::new(
                RemoteKeySet::fetch(url.clone(), http.clone())
                    .await?
                    .with_min_refetch_interval(cfg.gateway.jwks_min_refetch_interval),
            )),
            None => None,
        };
        let keys: Arc<dyn KeySource> = match &remote_keys {
            Some(remote) => remote.clone(),
            None => key_ring,
        };
        let pipeline = Arc::new(GatewayPipeline::new(
            &cfg.gateway,
            authority.codec().clone(),
            keys,
            UpstreamClient::new(http),
        ));

        Ok(Self {
            authority,
            auth_state,
            pipeline,
            remote_keys,
        })
    }

    /// Starts the background maintenance tasks.
    pub fn spawn_maintenance(&self, cfg: &AppConfig) -> Maintenance {
        let mut maintenance = Maintenance::default();
        if let Some(every) = cfg.auth.signing.rotation_interval {
            maintenance.push(tasks::spawn_key_rotation(
                Arc::clone(&self.authority),
                every,
                cfg.auth.signing.rotation_retry_delay,
            ));
        }
        maintenance.push(tasks::spawn_auth_cleanup(
            Arc::clone(&self.authority),
            &cfg.auth,
            cfg.auth.tokens.refresh_cleanup_interval,
        ));
        maintenance.push(tasks::spawn_bucket_eviction(
            Arc::clone(self.pipeline.limiter()),
            cfg.gateway.rate_limit.idle_eviction,
        ));
        if let Some(remote) = &self.remote_keys {
            maintenance.push(Arc::clone(remote).spawn_refresh(cfg.gateway.jwks_refresh_interval));
        }
        maintenance
    }
}

async fn healthz(State(services): State<Services>) -> Json<Value> {
    let upstreams: Vec<Value> = services
        .pipeline
        .breakers()
        .states()
        .into_iter()
        .map(|(id, state)| json!({ "upstream": id, "circuit": state.to_string() }))
        .collect();
    Json(json!({
        "status": "ok",
        "signing_key": services.authority.key_ring().active().kid(),
        "published_keys": services.authority.key_ring().public_key_set().len(),
        "upstreams": upstreams,
    }))
}

/// Authority endpoints and health check, with every other path going
/// through the gateway.
pub fn build_app(cfg: &AppConfig, services: &Services) -> Router {
    let health = Router::new()
        .route("/healthz", get(healthz))
        .with_state(services.clone());

    tollgate_auth::router(services.auth_state.clone())
        .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes))
        .merge(health)
        .fallback_service(tollgate_gateway::router(Arc::clone(&services.pipeline)))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record("http.status_code", res.status().as_u16());
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

pub struct TollgateServer {
    addr: SocketAddr,
    app: Router,
    maintenance: Maintenance,
    services: Services,
}

impl TollgateServer {
    /// Builds the components, the router and starts maintenance tasks.
    pub async fn build(cfg: AppConfig) -> anyhow::Result<Self> {
        let services = Services::build(&cfg).await?;
        let app = build_app(&cfg, &services);
        let maintenance = services.spawn_maintenance(&cfg);
        Ok(Self {
            addr: cfg.addr(),
            app,
            maintenance,
            services,
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "listening");
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        drop(self.maintenance);
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

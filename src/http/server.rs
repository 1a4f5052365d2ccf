//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, request ID, timeout, body limit, rate limit)
//! - Render the middleware's own error responses as JSON
//! - Bind server to listener
//! - Spawn the health monitor and the rate limiter refill sweep
//! - Dispatch requests to the balancer and forward to the selected upstream

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::client::{build_client, HttpClient};
use crate::http::response::{error_response, render_layer_errors};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Balancer, BalancerError};
use crate::observability::metrics;
use crate::security::{rate_limit_middleware, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub balancer: Arc<Balancer>,
}

/// HTTP server for the balancer.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    balancer: Arc<Balancer>,
    limiter: Option<Arc<RateLimiter>>,
    client: HttpClient,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Fails if the upstream list is empty or contains a malformed address.
    pub fn new(config: ProxyConfig) -> Result<Self, BalancerError> {
        let client = build_client(Duration::from_secs(config.timeouts.connect_secs));
        let balancer = Arc::new(Balancer::from_addresses(&config.upstreams, client.clone())?);
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));

        let state = AppState {
            balancer: balancer.clone(),
        };
        let router = Self::build_router(&config, state, limiter.clone());

        Ok(Self {
            router,
            config,
            balancer,
            limiter,
            client,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState, limiter: Option<Arc<RateLimiter>>) -> Router {
        let mut router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state);

        if let Some(limiter) = limiter {
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        router
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                Duration::from_secs(config.timeouts.request_secs),
            ))
            .layer(middleware::map_response(render_layer_errors))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Background tasks are spawned here and stop when `shutdown` fires; the
    /// server then stops accepting and drains in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstreams = self.balancer.upstreams().len(),
            "HTTP server starting"
        );

        for upstream in self.balancer.upstreams() {
            metrics::record_upstream_health(upstream.url().as_str(), upstream.is_alive());
        }

        if self.config.health_check.enabled {
            let monitor = HealthMonitor::new(
                self.balancer.upstreams().to_vec(),
                self.config.health_check.clone(),
                self.client.clone(),
            );
            tokio::spawn(monitor.run(shutdown.subscribe()));
        }

        if let Some(limiter) = &self.limiter {
            tokio::spawn(limiter.clone().run_refill(shutdown.subscribe()));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let mut signal = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.recv().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.limiter.as_ref()
    }

    /// A clone of the fully layered router, for in-process requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Main proxy handler.
/// Selects the next alive upstream and forwards the request to it.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let upstream = match state.balancer.next() {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!(error = %e, path = %request.uri().path(), "Failed to get next upstream");
            metrics::record_request(&method, StatusCode::SERVICE_UNAVAILABLE.as_u16(), "none", start);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available");
        }
    };

    tracing::debug!(upstream = %upstream.url(), uri = %request.uri(), "Forwarding request");
    let response = upstream.forward(request, client_addr).await;

    metrics::record_request(&method, response.status().as_u16(), upstream.url().as_str(), start);
    response
}

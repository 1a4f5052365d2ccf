//! Startup orchestration.
//!
//! Order: build the balancer and limiter (fail fast on bad upstreams), then
//! metrics, then bind. Listeners start last so traffic only arrives when
//! everything behind them is ready.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time;

use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::BalancerError;
use crate::observability::metrics;

/// Fatal errors during startup or serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot create balancer: {0}")]
    Balancer(#[from] BalancerError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("cannot start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Run the proxy until SIGINT/SIGTERM, then drain for at most the configured timeout.
pub async fn run(config: ProxyConfig) -> Result<(), StartupError> {
    let server = HttpServer::new(config.clone())?;

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    let shutdown = Shutdown::new();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.clone()));

    tokio::select! {
        result = &mut server_task => return Ok(result??),
        _ = signals::wait_for_signal() => {}
    }

    tracing::info!("Shutdown signal received");
    shutdown.trigger();

    let drain = Duration::from_secs(config.listener.shutdown_timeout_secs);
    match time::timeout(drain, &mut server_task).await {
        Ok(result) => {
            result??;
            tracing::info!("Server shutdown gracefully");
        }
        Err(_) => {
            tracing::warn!(timeout_secs = drain.as_secs(), "Shutdown timeout elapsed, aborting in-flight requests");
            server_task.abort();
        }
    }
    Ok(())
}

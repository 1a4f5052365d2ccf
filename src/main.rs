//! Balancer Proxy
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ rate limiter ──▶ balancer ──▶ upstream ──▶ Backend
//!                                      (per client)    (round-robin,   (forward,
//!                                                       alive only)     passive check)
//!
//!     Background:  health monitor (probe every interval)   refill sweep (every second)
//! ```

use std::path::PathBuf;

use clap::Parser;

use balancer_proxy::config::load_config;
use balancer_proxy::lifecycle::startup;
use balancer_proxy::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "balancer-proxy", version, about = "Round-robin HTTP load balancer")]
struct Cli {
    /// Path to a TOML configuration file. Environment variables override it.
    #[arg(short, long, env = "BALANCER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, warnings) = load_config(cli.config.as_deref())?;
    logging::init_logging(&config.observability);
    for warning in &warnings {
        tracing::warn!(key = warning.key, value = %warning.value, "Ignoring invalid environment override");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "balancer-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstreams = ?config.upstreams,
        health_check_interval_ms = config.health_check.interval_ms,
        rate_limit_capacity = config.rate_limit.capacity,
        rate_limit_refill = config.rate_limit.refill_rate,
        "Configuration loaded"
    );

    if let Err(e) = startup::run(config).await {
        tracing::error!(error = %e, "Fatal error");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

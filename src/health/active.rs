//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every upstream, concurrently
//! - Update upstream liveness on state change only

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode, Uri};
use futures_util::future::join_all;
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use crate::config::HealthCheckConfig;
use crate::health::state::Transition;
use crate::http::client::HttpClient;
use crate::http::request::upstream_uri;
use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::upstream::Upstream;
use crate::observability::metrics;

const USER_AGENT: &str = "balancer-proxy-health-check";

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 2xx response.
    Healthy(StatusCode),
    /// Any other response status.
    BadStatus(StatusCode),
    /// No response: connection or protocol error.
    Failed(String),
    /// No response within the probe timeout.
    TimedOut(Duration),
}

impl ProbeOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            ProbeOutcome::Healthy(status)
        } else {
            ProbeOutcome::BadStatus(status)
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy(_))
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Healthy(status) => write!(f, "status {}", status),
            ProbeOutcome::BadStatus(status) => write!(f, "unhealthy status {}", status),
            ProbeOutcome::Failed(e) => write!(f, "connection error: {}", e),
            ProbeOutcome::TimedOut(after) => write!(f, "timed out after {:?}", after),
        }
    }
}

pub struct HealthMonitor {
    upstreams: Vec<Arc<Upstream>>,
    config: HealthCheckConfig,
    client: HttpClient,
}

impl HealthMonitor {
    pub fn new(upstreams: Vec<Arc<Upstream>>, config: HealthCheckConfig, client: HttpClient) -> Self {
        Self {
            upstreams,
            config,
            client,
        }
    }

    /// Probe on every tick until `shutdown` fires.
    ///
    /// A probe round always runs to completion; shutdown is observed between rounds.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_secs = self.config.timeout_secs,
            upstreams = self.upstreams.len(),
            "Health monitor starting"
        );

        let interval = Duration::from_millis(self.config.interval_ms);
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one probe round over all upstreams and wait for every result.
    pub async fn check_all(&self) -> Vec<Option<Transition>> {
        let probes = self.upstreams.iter().map(|upstream| async move {
            let outcome = self.probe(upstream).await;
            apply_outcome(upstream, &outcome)
        });
        join_all(probes).await
    }

    /// Issue one GET against `upstream` and classify the result.
    pub async fn probe(&self, upstream: &Upstream) -> ProbeOutcome {
        let uri = match probe_uri(upstream.url(), self.config.path.as_deref()) {
            Ok(uri) => uri,
            Err(e) => return ProbeOutcome::Failed(e),
        };
        tracing::debug!(upstream = %upstream.url(), uri = %uri, "Checking upstream");

        let request = match Request::get(uri)
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::empty())
        {
            Ok(request) => request,
            Err(e) => return ProbeOutcome::Failed(e.to_string()),
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => ProbeOutcome::from_status(response.status()),
            Ok(Err(e)) => ProbeOutcome::Failed(e.to_string()),
            Err(_) => ProbeOutcome::TimedOut(timeout),
        }
    }
}

/// Apply a probe outcome to an upstream's liveness, logging state changes only.
pub fn apply_outcome(upstream: &Upstream, outcome: &ProbeOutcome) -> Option<Transition> {
    let transition = upstream.liveness().observe(outcome.is_healthy());
    match transition {
        Some(Transition::Died) => {
            tracing::warn!(upstream = %upstream.url(), cause = %outcome, "Upstream became unavailable");
            metrics::record_upstream_health(upstream.url().as_str(), false);
        }
        Some(Transition::Recovered) => {
            tracing::info!(upstream = %upstream.url(), "Upstream recovered");
            metrics::record_upstream_health(upstream.url().as_str(), true);
        }
        None => {}
    }
    transition
}

/// The base address itself, or the configured path under it.
fn probe_uri(base: &Url, path: Option<&str>) -> Result<Uri, String> {
    match path {
        None => base.as_str().parse::<Uri>().map_err(|e| e.to_string()),
        Some(path) => {
            let path: Uri = path.parse().map_err(|e: axum::http::uri::InvalidUri| e.to_string())?;
            upstream_uri(base, &path).map_err(|e| e.to_string())
        }
    }
}

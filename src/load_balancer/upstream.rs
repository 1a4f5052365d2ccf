//! Upstream abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track liveness (shared with the health monitor)
//! - Forward requests to the backend, failing over reactively on error

use std::fmt;
use std::net::SocketAddr;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use url::Url;

use crate::health::{passive, state::LivenessFlag};
use crate::http::client::{classify_failure, FailureOrigin, HttpClient};
use crate::http::request::prepare_upstream_request;
use crate::http::response::{error_response, from_upstream};
use crate::load_balancer::BalancerError;

/// A single backend server.
pub struct Upstream {
    url: Url,
    client: HttpClient,
    liveness: LivenessFlag,
}

impl Upstream {
    /// Create an upstream; it starts alive.
    pub fn new(url: Url, client: HttpClient) -> Self {
        Self {
            url,
            client,
            liveness: LivenessFlag::new(true),
        }
    }

    /// Parse `address` and create an upstream for it.
    pub fn from_address(address: &str, client: HttpClient) -> Result<Self, BalancerError> {
        Ok(Self::new(parse_upstream_url(address)?, client))
    }

    /// Base address of the backend.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn liveness(&self) -> &LivenessFlag {
        &self.liveness
    }

    /// Forward a request to this backend.
    ///
    /// Any response the backend produces is relayed unchanged. A transport
    /// failure marks this upstream dead and yields a 502; the request is not
    /// retried elsewhere. Failures caused by the inbound body leave liveness
    /// alone and answer 413 (over the size limit) or 400.
    pub async fn forward(&self, request: Request<Body>, client_addr: Option<SocketAddr>) -> Response {
        let (mut parts, body) = request.into_parts();

        if let Err(e) = prepare_upstream_request(&mut parts, &self.url, client_addr) {
            tracing::error!(upstream = %self.url, error = %e, "Failed to build upstream request");
            return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => from_upstream(response),
            Err(e) => match classify_failure(&e) {
                FailureOrigin::Upstream => {
                    passive::record_forward_failure(self, &e);
                    error_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
                }
                FailureOrigin::BodyTooLarge => {
                    tracing::debug!(upstream = %self.url, "Request body over size limit");
                    error_response(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")
                }
                FailureOrigin::Client => {
                    tracing::debug!(upstream = %self.url, error = %e, "Request body failed on client side");
                    error_response(StatusCode::BAD_REQUEST, "Bad Request")
                }
            },
        }
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("url", &self.url.as_str())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Parse and check an upstream base address.
///
/// Accepts absolute `http://host[:port][/path]` URLs only.
pub fn parse_upstream_url(address: &str) -> Result<Url, BalancerError> {
    let invalid = |reason: String| BalancerError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let url = Url::parse(address.trim()).map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    if url.fragment().is_some() {
        return Err(invalid("fragments are not allowed".to_string()));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::build_client;
    use axum::body::Bytes;
    use std::time::Duration;

    #[test]
    fn test_parse_upstream_url() {
        assert!(parse_upstream_url("http://127.0.0.1:9001").is_ok());
        assert!(parse_upstream_url(" http://backend/api ").is_ok());

        for bad in ["", "127.0.0.1:9001", "ftp://host", "https://host", "http://host/#frag", "::"] {
            assert!(
                matches!(parse_upstream_url(bad), Err(BalancerError::InvalidAddress { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_forward_failure_marks_dead() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = Upstream::from_address(
            &format!("http://{}", addr),
            build_client(Duration::from_secs(1)),
        )
        .unwrap();
        assert!(upstream.is_alive());

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = upstream.forward(request, None).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!upstream.is_alive());
    }

    /// Backend that reads requests forever and never answers.
    async fn spawn_sink() -> std::net::SocketAddr {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_client_body_error_keeps_upstream_alive() {
        let addr = spawn_sink().await;
        let upstream = Upstream::from_address(
            &format!("http://{}", addr),
            build_client(Duration::from_secs(1)),
        )
        .unwrap();

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial upload")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let response = tokio::time::timeout(Duration::from_secs(5), upstream.forward(request, None))
            .await
            .expect("forward should fail fast");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(upstream.is_alive());
    }
}

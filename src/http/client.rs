//! Outbound HTTP client shared by forwarding and health probes.

use std::error::Error as StdError;
use std::time::Duration;

use axum::body::Body;
use http_body_util::LengthLimitError;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// Pooled HTTP/1.1 client used to reach upstreams.
pub type HttpClient = Client<HttpConnector, Body>;

/// Build the upstream client with a bounded connect timeout.
///
/// The client is cheap to clone; clones share one connection pool.
pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);

    Client::builder(TokioExecutor::new()).build(connector)
}

/// Which side of the exchange a failed upstream request is blamed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// The inbound body went over the configured size limit.
    BodyTooLarge,
    /// The inbound request or its body failed on the client's side.
    Client,
    /// Connecting to or exchanging data with the backend failed.
    Upstream,
}

/// Classify a client error by walking its source chain.
///
/// Only [`FailureOrigin::Upstream`] says anything about backend health.
pub fn classify_failure(error: &(dyn StdError + 'static)) -> FailureOrigin {
    let mut origin = FailureOrigin::Upstream;
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return FailureOrigin::BodyTooLarge;
        }
        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            if hyper_err.is_user() || hyper_err.is_body_write_aborted() {
                origin = FailureOrigin::Client;
            }
        }
        current = err.source();
    }
    origin
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use http_body_util::{BodyExt, Full, Limited};
    use std::fmt;

    #[derive(Debug)]
    struct Wrapped(Box<dyn StdError + Send + Sync>);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "request failed")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&*self.0)
        }
    }

    #[tokio::test]
    async fn test_length_limit_found_in_source_chain() {
        let limit_error = Limited::new(Full::new(Bytes::from_static(b"way too long")), 4)
            .collect()
            .await
            .unwrap_err();

        assert_eq!(classify_failure(&*limit_error), FailureOrigin::BodyTooLarge);
        assert_eq!(classify_failure(&Wrapped(limit_error)), FailureOrigin::BodyTooLarge);
    }

    #[test]
    fn test_transport_errors_blame_upstream() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_failure(&refused), FailureOrigin::Upstream);
        assert_eq!(classify_failure(&Wrapped(Box::new(refused))), FailureOrigin::Upstream);
    }
}

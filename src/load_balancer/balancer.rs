//! Upstream registry and selection.

use std::sync::Arc;

use crate::http::client::HttpClient;
use crate::load_balancer::{round_robin::RoundRobin, upstream::Upstream, BalancerError};

/// Owns the fixed, ordered upstream list and the rotation cursor.
#[derive(Debug)]
pub struct Balancer {
    upstreams: Vec<Arc<Upstream>>,
    strategy: RoundRobin,
}

impl Balancer {
    /// Create a balancer over an already-built upstream list.
    pub fn new(upstreams: Vec<Arc<Upstream>>) -> Result<Self, BalancerError> {
        if upstreams.is_empty() {
            return Err(BalancerError::NoUpstreams);
        }
        Ok(Self {
            upstreams,
            strategy: RoundRobin::new(),
        })
    }

    /// Parse every address and build one upstream per entry, in order.
    ///
    /// Fails on the first malformed address or when `addresses` is empty.
    pub fn from_addresses<S: AsRef<str>>(
        addresses: &[S],
        client: HttpClient,
    ) -> Result<Self, BalancerError> {
        let upstreams = addresses
            .iter()
            .map(|address| Upstream::from_address(address.as_ref(), client.clone()).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        for upstream in &upstreams {
            tracing::debug!(upstream = %upstream.url(), "Registered upstream");
        }

        Self::new(upstreams)
    }

    /// Select the next alive upstream in rotation order.
    pub fn next(&self) -> Result<Arc<Upstream>, BalancerError> {
        self.strategy.select(&self.upstreams)
    }

    /// All upstreams, for health checking.
    pub fn upstreams(&self) -> &[Arc<Upstream>] {
        &self.upstreams
    }

    /// Number of upstreams currently alive.
    pub fn alive_count(&self) -> usize {
        self.upstreams.iter().filter(|u| u.is_alive()).count()
    }

    /// Total selection attempts so far.
    pub fn cursor(&self) -> usize {
        self.strategy.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::build_client;
    use std::time::Duration;

    fn balancer(addresses: &[&str]) -> Balancer {
        Balancer::from_addresses(addresses, build_client(Duration::from_secs(1))).unwrap()
    }

    fn host(upstream: &Upstream) -> String {
        upstream.url().host_str().unwrap().to_string()
    }

    #[test]
    fn test_rotation_order() {
        let lb = balancer(&["http://a", "http://b", "http://c"]);
        let picked: Vec<_> = (0..6).map(|_| host(&lb.next().unwrap())).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_fair_distribution() {
        let lb = balancer(&["http://a", "http://b", "http://c", "http://d"]);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..400 {
            *counts.entry(host(&lb.next().unwrap())).or_insert(0) += 1;
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 100));
    }

    #[test]
    fn test_single_alive_found_within_n() {
        let lb = balancer(&["http://a", "http://b", "http://c", "http://d", "http://e"]);
        for (i, u) in lb.upstreams().iter().enumerate() {
            if i != 3 {
                u.liveness().mark_dead();
            }
        }

        for _ in 0..10 {
            let before = lb.cursor();
            assert_eq!(host(&lb.next().unwrap()), "d");
            assert!(lb.cursor() - before <= lb.upstreams().len());
        }
    }

    #[test]
    fn test_no_alive_upstreams() {
        let lb = balancer(&["http://a", "http://b", "http://c"]);
        for u in lb.upstreams() {
            u.liveness().mark_dead();
        }

        assert_eq!(lb.next().unwrap_err(), BalancerError::NoAliveUpstreams);
        assert_eq!(lb.cursor(), 3);
        assert_eq!(lb.alive_count(), 0);

        lb.upstreams()[2].liveness().mark_alive();
        assert_eq!(host(&lb.next().unwrap()), "c");
    }

    #[test]
    fn test_construction_errors() {
        let client = build_client(Duration::from_secs(1));
        let empty: [&str; 0] = [];
        assert_eq!(
            Balancer::from_addresses(&empty, client.clone()).unwrap_err(),
            BalancerError::NoUpstreams
        );
        assert!(matches!(
            Balancer::from_addresses(&["http://a", "bogus"], client).unwrap_err(),
            BalancerError::InvalidAddress { address, .. } if address == "bogus"
        ));
    }

    #[test]
    fn test_concurrent_selection_is_fair() {
        let lb = Arc::new(balancer(&["http://a", "http://b", "http://c"]));
        let counts = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    let lb = lb.clone();
                    s.spawn(move || {
                        (0..300).map(|_| host(&lb.next().unwrap())).collect::<Vec<_>>()
                    })
                })
                .collect();
            let mut counts = std::collections::HashMap::new();
            for h in handles {
                for name in h.join().unwrap() {
                    *counts.entry(name).or_insert(0usize) += 1;
                }
            }
            counts
        });

        assert!(counts.values().all(|&c| c == 600));
    }
}

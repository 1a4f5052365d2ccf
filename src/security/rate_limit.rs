//! Per-client rate limiting middleware backed by token buckets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use parking_lot::RwLock;
use tokio::time;

use crate::config::RateLimitConfig;
use crate::http::response::error_response;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::security::bucket::Bucket;
use crate::security::client_id::resolve_client_id;

/// Period of the background refill sweep.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_MAX_CLIENTS: usize = 100_000;

/// A full map sheds this fraction (1/N) of its entries in one pass.
const EVICTION_BATCH_DIVISOR: usize = 100;

/// Keyed token buckets, one per client identity.
///
/// Buckets are created lazily at full capacity. The map is bounded: when
/// full, the least recently seen 1% of buckets (at least one) make room for
/// new ones, so the scan runs once per batch of new identities rather than
/// once per insert. The sweep drops buckets idle for longer than the TTL.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
    capacity: u32,
    refill_rate: u32,
    max_clients: usize,
    idle_ttl: Option<Duration>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity,
            refill_rate,
            max_clients: DEFAULT_MAX_CLIENTS,
            idle_ttl: None,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.refill_rate)
            .with_max_clients(config.max_clients)
            .with_idle_ttl((config.idle_ttl_secs > 0).then(|| Duration::from_secs(config.idle_ttl_secs)))
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Option<Duration>) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Admit or deny one request from `client_id`.
    pub fn allow(&self, client_id: &str) -> bool {
        self.allow_at(client_id, Instant::now())
    }

    /// [`allow`](Self::allow) with an explicit clock reading.
    pub fn allow_at(&self, client_id: &str, now: Instant) -> bool {
        let bucket = self.get_or_create(client_id);
        bucket.touch(now);
        bucket.refill_if_needed(now);
        bucket.try_take()
    }

    /// Look up the bucket for `client_id`, creating a full one on first sight.
    ///
    /// The common hit path only takes the read lock. On a miss the write
    /// lock is taken and the map re-checked, so concurrent first requests
    /// from one client share a single bucket.
    pub fn get_or_create(&self, client_id: &str) -> Arc<Bucket> {
        let existing = self.buckets.read().get(client_id).cloned();
        if let Some(bucket) = existing {
            return bucket;
        }

        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get(client_id) {
            return bucket.clone();
        }

        if buckets.len() >= self.max_clients {
            let batch = (self.max_clients / EVICTION_BATCH_DIVISOR).max(1);
            let evicted = evict_least_recent(&mut buckets, batch);
            tracing::debug!(evicted, "Evicted least recently seen rate limit buckets");
        }

        let bucket = Arc::new(Bucket::new(self.capacity, self.refill_rate));
        buckets.insert(client_id.to_string(), bucket.clone());
        tracing::trace!(client = %client_id, tracked = buckets.len(), "Created rate limit bucket");
        bucket
    }

    /// Refill every bucket. Holds only the read lock.
    pub fn refill_all(&self, now: Instant) {
        for bucket in self.buckets.read().values() {
            bucket.refill_if_needed(now);
        }
    }

    /// Drop buckets idle for longer than the TTL. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let Some(ttl) = self.idle_ttl else {
            return 0;
        };

        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.idle_for(now) <= ttl);
        before - buckets.len()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.buckets.read().contains_key(client_id)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refill all buckets every second until `shutdown` fires.
    pub async fn run_refill(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        tracing::info!(
            capacity = self.capacity,
            refill_rate = self.refill_rate,
            max_clients = self.max_clients,
            "Rate limiter refill sweep starting"
        );

        let mut ticker = time::interval(REFILL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.refill_all(now);
                    let evicted = self.evict_idle(now);
                    if evicted > 0 {
                        tracing::debug!(evicted, "Evicted idle rate limit buckets");
                    }
                    metrics::record_tracked_clients(self.len());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limiter received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Remove up to `count` buckets with the oldest `last_seen`. Returns how many were removed.
fn evict_least_recent(buckets: &mut HashMap<String, Arc<Bucket>>, count: usize) -> usize {
    let mut by_age: Vec<(Instant, &String)> = buckets
        .iter()
        .map(|(key, bucket)| (bucket.last_seen(), key))
        .collect();

    let count = count.min(by_age.len());
    if count == 0 {
        return 0;
    }
    if count < by_age.len() {
        by_age.select_nth_unstable_by_key(count, |(seen, _)| *seen);
    }

    let victims: Vec<String> = by_age[..count].iter().map(|(_, key)| (*key).clone()).collect();
    for key in &victims {
        buckets.remove(key);
    }
    victims.len()
}

/// Middleware rejecting over-limit clients with a 429 JSON body.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_id = resolve_client_id(request.headers(), remote);

    if limiter.allow(&client_id) {
        next.run(request).await
    } else {
        tracing::debug!(client = %client_id, "Rate limit exceeded");
        metrics::record_rate_limited();
        error_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
    }

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_allow_until_empty() {
        let limiter = RateLimiter::new(3, 1);
        limiter.get_or_create("a");
        let now = Instant::now();

        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("a", now));
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));

        // Separate identities do not share state.
        assert!(limiter.allow_at("b", now));
        assert_eq!(limiter.len(), 2);

        // Lazy refill on the next admission check.
        assert!(limiter.allow_at("a", now + Duration::from_secs(1)));
        assert!(!limiter.allow_at("a", now + Duration::from_secs(1)));
    }

    #[test]
    fn test_get_or_create_returns_same_bucket() {
        let limiter = Arc::new(RateLimiter::new(10, 1));
        let buckets: Vec<Arc<Bucket>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    s.spawn(move || limiter.get_or_create("same"))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(limiter.len(), 1);
        assert!(buckets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_refill_all_advances_idle_clients() {
        let limiter = RateLimiter::new(2, 1);
        let bucket = limiter.get_or_create("idle");
        let now = Instant::now();
        limiter.allow_at("idle", now);
        limiter.allow_at("idle", now);
        assert_eq!(bucket.tokens(), 0);

        limiter.refill_all(now + Duration::from_secs(1));
        assert_eq!(bucket.tokens(), 1);
    }

    #[test]
    fn test_max_clients_evicts_least_recent() {
        let limiter = RateLimiter::new(5, 1).with_max_clients(2);
        let t0 = Instant::now();

        limiter.allow_at("a", t0);
        limiter.allow_at("b", t0 + Duration::from_secs(1));
        limiter.allow_at("a", t0 + Duration::from_secs(2));
        limiter.allow_at("c", t0 + Duration::from_secs(3));

        assert_eq!(limiter.len(), 2);
        assert!(limiter.contains("a"));
        assert!(!limiter.contains("b"));
        assert!(limiter.contains("c"));
    }

    #[test]
    fn test_full_map_evicts_in_batches() {
        let limiter = RateLimiter::new(5, 1).with_max_clients(200);
        let t0 = Instant::now();
        for i in 0..200u64 {
            limiter.allow_at(&format!("c{i}"), t0 + Duration::from_secs(i + 1));
        }
        assert_eq!(limiter.len(), 200);

        // One pass drops the two oldest and leaves room for the next insert too.
        limiter.allow_at("new1", t0 + Duration::from_secs(500));
        assert_eq!(limiter.len(), 199);
        assert!(!limiter.contains("c0"));
        assert!(!limiter.contains("c1"));
        assert!(limiter.contains("c2"));

        limiter.allow_at("new2", t0 + Duration::from_secs(501));
        assert_eq!(limiter.len(), 200);
        assert!(limiter.contains("c2"));

        limiter.allow_at("new3", t0 + Duration::from_secs(502));
        assert_eq!(limiter.len(), 199);
        assert!(!limiter.contains("c2"));
        assert!(!limiter.contains("c3"));
        assert!(limiter.contains("new1"));
    }

    #[test]
    fn test_evict_idle() {
        let limiter = RateLimiter::new(5, 1).with_idle_ttl(Some(Duration::from_secs(60)));
        let t0 = Instant::now();
        limiter.allow_at("old", t0);
        limiter.allow_at("fresh", t0 + Duration::from_secs(100));

        assert_eq!(limiter.evict_idle(t0 + Duration::from_secs(120)), 1);
        assert!(limiter.contains("fresh"));
        assert!(!limiter.contains("old"));

        let no_ttl = RateLimiter::new(5, 1);
        no_ttl.allow_at("x", t0);
        assert_eq!(no_ttl.evict_idle(t0 + Duration::from_secs(3600)), 0);
    }

    #[tokio::test]
    async fn test_middleware_rejects_with_json() {
        let limiter = Arc::new(RateLimiter::new(2, 1));
        let app = app(limiter);

        for _ in 0..2 {
            let res = app.clone().oneshot(request(&[("x-client-id", "c1")])).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app.clone().oneshot(request(&[("x-client-id", "c1")])).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], 429);
        assert_eq!(json["message"], "Too Many Requests");

        let res = app.oneshot(request(&[("x-client-id", "c2")])).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_uses_forwarded_for() {
        let limiter = Arc::new(RateLimiter::new(1, 1));
        let app = app(limiter.clone());

        let res = app
            .clone()
            .oneshot(request(&[("x-forwarded-for", "203.0.113.9")]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(limiter.contains("203.0.113.9"));

        let res = app
            .oneshot(request(&[("x-forwarded-for", "203.0.113.9")]))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_middleware_falls_back_to_peer_address() {
        let limiter = Arc::new(RateLimiter::new(5, 1));
        let mut req = request(&[]);
        req.extensions_mut()
            .insert(ConnectInfo::<SocketAddr>("192.0.2.10:5000".parse().unwrap()));

        let res = app(limiter.clone()).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(limiter.contains("192.0.2.10"));
    }
}

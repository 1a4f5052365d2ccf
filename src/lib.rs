//! Round-robin HTTP load balancer with active health checks and per-client rate limiting.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{Balancer, BalancerError, Upstream};
pub use security::RateLimiter;

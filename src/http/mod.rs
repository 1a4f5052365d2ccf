//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, rate limit)
//!     → [load balancer picks an alive upstream]
//!     → request.rs (rewrite URI, strip hop-by-hop headers, X-Forwarded-For)
//!     → client.rs (pooled HTTP/1.1 client)
//!     → response.rs (relay upstream response, or JSON error)
//!     → Send to client
//! ```

pub mod client;
pub mod request;
pub mod response;
pub mod server;

pub use client::{build_client, HttpClient};
pub use response::{error_response, ErrorBody};
pub use server::{AppState, HttpServer};

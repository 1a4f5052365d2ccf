//! Minimal backend for local testing: answers every path with its own port.
//!
//! ```text
//! PORT=9001 cargo run --bin test-server
//! ```

use axum::{extract::State, routing::any, Router};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 9001;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "test_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = match std::env::var("PORT") {
        Ok(raw) => raw.parse::<u16>()?,
        Err(_) => DEFAULT_PORT,
    };

    let app = Router::new()
        .route("/", any(hello))
        .route("/{*path}", any(hello))
        .with_state(port);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "Test server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn hello(State(port): State<u16>) -> String {
    tracing::debug!(port, "Serving request");
    format!("Hello from test server on port {}", port)
}

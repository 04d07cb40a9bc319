//! Server-side streaming proxy.
//!
//! Sits between the reading client and the content origin. Each inbound request is
//! validated, turned into exactly one authenticated upstream request, and answered
//! with the upstream status, a whitelisted header set and the streamed body.
//!
//! Routes:
//! - `GET /health`
//! - `GET|HEAD /api/pdf/{book_id}` (demo pass-through, optional auth)
//! - `GET /api/books/{book_id}/stream` (session route, auth cookie required)

mod forward;
mod handlers;
mod ratelimit;
mod state;

pub use forward::{
    DEMO_RESPONSE_HEADERS, ProxyForwardContext, ProxyRoute, STREAM_RESPONSE_HEADERS,
    SessionParams, expose_headers_value, parse_book_id,
};
pub use ratelimit::RangeRateLimiter;
pub use state::AppState;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;

/// Path of the session route for a book; the reader derives proxy URLs from it.
pub fn stream_path(book_id: u64) -> String {
    format!("/api/books/{book_id}/stream")
}

/// Create the proxy router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Explicit HEAD so it is forwarded upstream instead of answered from GET.
        .route(
            "/api/pdf/{book_id}",
            get(handlers::demo_pdf).head(handlers::demo_pdf),
        )
        .route("/api/books/{book_id}/stream", get(handlers::stream_pdf))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: ProxyConfig) -> Result<()> {
    let bind = config.bind.clone();
    let backend = config.backend_url.clone();
    let state = AppState::new(config)?;
    let _cleanup = state.limiter.spawn_cleanup(Duration::from_secs(60));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(bind = %bind, backend = %backend, "streaming proxy listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}

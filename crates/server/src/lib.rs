#![cfg_attr(not(test), forbid(unsafe_code))]

//! Cartpool server - HTTP API and realtime order rooms.
//!
//! The binary in `main.rs` wires this library together: configuration from
//! the environment, a SQLite pool, session-backed identity resolution, and
//! one broadcast room per live order for WebSocket subscribers.

use tower_http::trace::TraceLayer;

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ServerConfig;
pub use error::{AppError, Result};
pub use state::AppState;

/// Assemble the full service stack around `state`.
///
/// Everything except the listener lives here so the binary and the test
/// harness serve an identical stack: routes, the session layer, request
/// IDs, HTTP tracing, and the Sentry tower layers.
///
/// # Errors
///
/// Returns `sqlx::Error` if the session store cannot migrate its table.
pub async fn app(state: AppState) -> std::result::Result<axum::Router, sqlx::Error> {
    let session_layer = middleware::create_session_layer(state.pool(), state.config()).await?;

    Ok(routes::routes()
        .layer(session_layer)
        .layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction()))
}

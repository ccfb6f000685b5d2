//! HTTP route handlers for the coordination API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /healthz                       - Liveness check
//! GET  /readyz                        - Readiness check (DB ping)
//!
//! # Orders
//! POST /orders                        - Create an order
//! GET  /orders                        - Orders created by the caller
//! GET  /orders/{id}                   - Order snapshot
//! GET  /orders/{id}/join/{token}      - Claim an invite link (rate limited)
//! GET  /orders/{id}/admin/{token}     - Claim an admin link (rate limited)
//! POST /orders/{id}/invites           - Mint an invite link (admin)
//! POST /orders/{id}/deadline          - Move the deadline (admin)
//! POST /orders/{id}/settings          - Change sign-in policy (admin)
//!
//! # Items
//! POST   /orders/{id}/items           - Add an item
//! PUT    /orders/{id}/items/{item_id} - Edit an item
//! DELETE /orders/{id}/items/{item_id} - Remove an item
//!
//! # Export
//! GET  /orders/{id}/export            - CSV download (?group_by=person|product)
//!
//! # Live updates
//! GET  /orders/{id}/ws                - WebSocket event stream
//!
//! # Auth boundary
//! GET  /auth/session                  - Current identity
//! POST /auth/login                    - Accept proxy-forwarded identity
//! POST /auth/logout                   - Clear the session
//! ```
//!
//! Every mutating handler follows the same shape: resolve identity, evaluate
//! capabilities, write through the repository (which bumps the order
//! revision), then publish the committed state to the room.

pub mod auth;
pub mod export;
pub mod items;
pub mod orders;
pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Router;

use cartpool_core::{Order, OrderId};

use crate::db::OrderRepository;
use crate::error::{AppError, Result};
use crate::middleware;
use crate::state::AppState;

/// Create all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .nest("/orders", order_routes())
        .nest("/auth", auth_routes())
}

/// Create the order routes router.
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::create).get(orders::index))
        .route("/{id}", get(orders::show))
        .route("/{id}/invites", post(orders::issue_invite))
        .route("/{id}/deadline", post(orders::change_deadline))
        .route("/{id}/settings", post(orders::change_settings))
        .route("/{id}/items", post(items::add))
        .route(
            "/{id}/items/{item_id}",
            put(items::update).delete(items::remove),
        )
        .route("/{id}/export", get(export::download))
        .route("/{id}/ws", get(ws::stream))
        .merge(token_routes())
}

/// Token presentation routes, rate limited per client IP.
fn token_routes() -> Router<AppState> {
    Router::new()
        .route("/{id}/join/{token}", get(orders::claim_invite))
        .route("/{id}/admin/{token}", get(orders::claim_admin))
        .layer(middleware::token_rate_limiter())
}

/// Create the auth routes router.
fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(auth::session))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies database connectivity before returning OK.
/// Returns 503 Service Unavailable if the database is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Fetch an order or fail with 404.
pub(crate) async fn load_order(state: &AppState, id: OrderId) -> Result<Order> {
    OrderRepository::new(state.pool())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound("order".to_owned()))
}

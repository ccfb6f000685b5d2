//! Application state shared across handlers.

use std::sync::Arc;

use cartpool_core::token::TokenCodec;
use cartpool_core::{Capabilities, Identity, Order, OrderId};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::config::ServerConfig;
use crate::realtime::RoomRegistry;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    pool: SqlitePool,
    tokens: TokenCodec,
    rooms: RoomRegistry,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Server configuration
    /// * `pool` - `SQLite` connection pool
    #[must_use]
    pub fn new(config: ServerConfig, pool: SqlitePool) -> Self {
        let tokens = TokenCodec::new(config.secret_key.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                tokens,
                rooms: RoomRegistry::new(),
            }),
        }
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Get a reference to the invite/admin token codec.
    #[must_use]
    pub fn tokens(&self) -> &TokenCodec {
        &self.inner.tokens
    }

    /// Get a reference to the realtime room registry.
    #[must_use]
    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    /// Evaluate what `identity` may do to `order` right now.
    ///
    /// Open anonymous editing only applies when no identity provider fronts
    /// the deployment; with an auth proxy configured, anonymous visitors are
    /// read-only on invite-only orders and item edits require ownership.
    #[must_use]
    pub fn capabilities<'a>(
        &self,
        identity: &'a Identity,
        order: &'a Order,
        now: DateTime<Utc>,
    ) -> Capabilities<'a> {
        Capabilities::new(identity, order, now)
            .with_open_editing(self.inner.config.auth_proxy.is_none())
    }

    /// Absolute URL a guest follows to claim an invite.
    #[must_use]
    pub fn join_url(&self, order_id: OrderId, token: &str) -> String {
        self.inner.config.join_url(order_id, token)
    }

    /// Absolute URL that grants admin on the order it names.
    #[must_use]
    pub fn admin_url(&self, order_id: OrderId, token: &str) -> String {
        self.inner.config.admin_url(order_id, token)
    }
}

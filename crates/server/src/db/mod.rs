//! Database operations for the Cartpool `SQLite` store.
//!
//! ## Tables
//!
//! - `orders` - Group purchase orders and their settings
//! - `order_items` - Line items keyed by opaque owner actor keys
//! - `tower_sessions` - Session state (created by the session store itself)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p cartpool-cli -- migrate
//! ```

pub mod items;
pub mod orders;

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;

pub use items::ItemRepository;
pub use orders::{NewOrder, OrderRepository};

/// Embedded schema migrations, applied by the CLI and the test harness.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,
}

/// Parse a text column into a domain value, mapping failure to
/// [`RepositoryError::DataCorruption`].
pub(crate) fn parse_column<T>(column: &str, raw: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| {
        RepositoryError::DataCorruption(format!("invalid {column} in database: {e}"))
    })
}

/// Create a `SQLite` connection pool with sensible defaults.
///
/// Creates the database file (and its parent directory) if missing, and
/// enables WAL journaling plus foreign key enforcement. In-memory databases
/// are capped at a single connection so every handle sees the same data.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    if !in_memory {
        let filename = options.get_filename().to_path_buf();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
}

//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! cartpool-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CARTPOOL_DATABASE_URL` (or `DATABASE_URL`) - `SQLite` connection
//!   string; defaults to `sqlite://data/cartpool.db`
//!
//! The server never migrates on startup; this command is the one place
//! schema changes are applied.

use thiserror::Error;

use cartpool_server::db;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration execution error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Apply all pending migrations.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("CARTPOOL_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| "sqlite://data/cartpool.db".to_owned());

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&database_url).await?;

    tracing::info!("Running migrations...");
    db::MIGRATOR.run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}

//! Invite and admin link minting.
//!
//! # Usage
//!
//! ```bash
//! cartpool-cli invite --order <ORDER_ID> --name "Alice"
//! cartpool-cli admin-link --order <ORDER_ID>
//! ```
//!
//! Tokens are stateless HMAC signatures, so links can be minted without a
//! running server - but only with the same `CARTPOOL_SECRET_KEY` the server
//! verifies with, which is why this loads the full server configuration.

use thiserror::Error;

use cartpool_core::OrderId;
use cartpool_core::token::{AdminPayload, EncodeError, InvitePayload, TokenCodec};
use cartpool_server::ServerConfig;
use cartpool_server::config::ConfigError;

/// Errors that can occur while minting links.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Token could not be minted.
    #[error("Token error: {0}")]
    Token(#[from] EncodeError),
}

/// Mint an invite link binding `name` to `order`.
pub fn invite(order: OrderId, name: &str) -> Result<(), LinkError> {
    let config = ServerConfig::from_env()?;
    let codec = TokenCodec::new(config.secret_key.clone());
    let token = codec.issue_invite(&InvitePayload::new(order, name))?;

    tracing::info!("Invite link for {}:", name);
    tracing::info!("  {}", config.join_url(order, &token));
    Ok(())
}

/// Mint an admin link for `order`.
pub fn admin(order: OrderId) -> Result<(), LinkError> {
    let config = ServerConfig::from_env()?;
    let codec = TokenCodec::new(config.secret_key.clone());
    let token = codec.issue_admin(&AdminPayload::new(order))?;

    tracing::info!("Admin link (keep it secret):");
    tracing::info!("  {}", config.admin_url(order, &token));
    Ok(())
}

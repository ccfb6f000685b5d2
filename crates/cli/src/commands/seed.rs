//! Seed the database with demo data.
//!
//! # Usage
//!
//! ```bash
//! # Built-in demo orders
//! cartpool-cli seed
//!
//! # Orders described in a YAML file
//! cartpool-cli seed --file fixtures.yaml
//! ```
//!
//! Orders and items go through the same repositories the server uses, so
//! seeded data is indistinguishable from organically created data. Each
//! seeded order's admin link is printed, there being no other way in.

use serde::Deserialize;
use thiserror::Error;

use cartpool_core::token::{AdminPayload, EncodeError, TokenCodec};
use cartpool_core::{Actor, Item, ItemId};
use cartpool_server::ServerConfig;
use cartpool_server::config::ConfigError;
use cartpool_server::db::{self, ItemRepository, NewOrder, OrderRepository, RepositoryError};

/// Built-in demo data used when no file is given.
const DEFAULT_SEED: &str = r"
orders:
  - vendor_name: Riverside Mill
    vendor_url: https://riversidemill.example/shop
    creator_name: Dana
    deadline_in_days: 7
    invite_only: true
    items:
      - owner_name: Dana
        product_name: Rye flour
        quantity: '2'
        note: coarse if available
      - owner_name: Noor
        product_name: Rolled oats
        sku: RM-104
  - vendor_name: Harbor Roasters
    vendor_url: https://harborroasters.example
    creator_name: Priya
    deadline_in_days: 3
    items:
      - owner_name: Priya
        product_name: Espresso blend
        url: https://harborroasters.example/espresso
        quantity: 2 bags
";

/// Errors that can occur while seeding.
#[derive(Debug, Error)]
pub enum SeedError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Seed file could not be read.
    #[error("Could not read {0}: {1}")]
    File(String, std::io::Error),

    /// Seed file could not be parsed.
    #[error("Invalid seed file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Write through a repository failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Admin link could not be minted.
    #[error("Token error: {0}")]
    Token(#[from] EncodeError),
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    orders: Vec<SeedOrder>,
}

#[derive(Debug, Deserialize)]
struct SeedOrder {
    vendor_name: String,
    vendor_url: String,
    creator_name: String,
    #[serde(default = "default_deadline_days")]
    deadline_in_days: i64,
    #[serde(default)]
    invite_only: bool,
    #[serde(default)]
    allow_oidc: bool,
    #[serde(default)]
    privacy_mode: bool,
    #[serde(default)]
    items: Vec<SeedItem>,
}

#[derive(Debug, Deserialize)]
struct SeedItem {
    owner_name: String,
    product_name: String,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    quantity: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

const fn default_deadline_days() -> i64 {
    7
}

/// Seed orders and items from `file`, or the built-in demo.
pub async fn run(file: Option<&str>) -> Result<(), SeedError> {
    let config = ServerConfig::from_env()?;

    let seed: SeedFile = match file {
        Some(path) => serde_yaml::from_str(
            &std::fs::read_to_string(path).map_err(|e| SeedError::File(path.to_owned(), e))?,
        )?,
        None => serde_yaml::from_str(DEFAULT_SEED)?,
    };

    let pool = db::create_pool(&config.database_url).await?;
    let codec = TokenCodec::new(config.secret_key.clone());
    let orders = OrderRepository::new(&pool);
    let items = ItemRepository::new(&pool);

    for entry in seed.orders {
        let order = orders
            .create(NewOrder {
                vendor_name: entry.vendor_name,
                vendor_url: entry.vendor_url,
                deadline: chrono::Utc::now() + chrono::TimeDelta::days(entry.deadline_in_days),
                creator_name: entry.creator_name,
                creator_subject: None,
                invite_only: entry.invite_only,
                allow_oidc: entry.allow_oidc,
                privacy_mode: entry.privacy_mode,
            })
            .await?;

        for seed_item in entry.items {
            let owner = Actor::Guest {
                name: seed_item.owner_name.clone(),
            };
            let item = Item {
                id: ItemId::new(),
                order_id: order.id,
                owner: owner.key(),
                owner_name: seed_item.owner_name,
                product_name: seed_item.product_name,
                product_sku: seed_item.sku,
                product_url: seed_item.url,
                quantity: seed_item.quantity.unwrap_or_else(|| "1".to_owned()),
                note: seed_item.note,
                added_at: chrono::Utc::now(),
            };
            items.insert(&item).await?;
        }

        let token = codec.issue_admin(&AdminPayload::new(order.id))?;
        tracing::info!("Seeded order {} ({})", order.id, order.vendor_name);
        tracing::info!("  admin link: {}", config.admin_url(order.id, &token));
    }

    tracing::info!("Seed complete!");
    Ok(())
}

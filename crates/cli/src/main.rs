//! Cartpool CLI - migrations, link minting, and demo data.
//!
//! # Usage
//!
//! ```bash
//! # Apply database migrations
//! cartpool-cli migrate
//!
//! # Mint an invite link for a guest
//! cartpool-cli invite --order <ORDER_ID> --name "Alice"
//!
//! # Mint an admin link
//! cartpool-cli admin-link --order <ORDER_ID>
//!
//! # Seed the database with demo orders
//! cartpool-cli seed
//! ```
//!
//! # Commands
//!
//! - `migrate` - Apply database migrations
//! - `invite` - Mint an invite link (requires the server's secret key)
//! - `admin-link` - Mint an admin link
//! - `seed` - Insert demo orders and items

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use cartpool_core::OrderId;

mod commands;

#[derive(Parser)]
#[command(name = "cartpool-cli")]
#[command(author, version, about = "Cartpool CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Mint an invite link for a guest
    Invite {
        /// Order the invite admits the guest to
        #[arg(short, long)]
        order: OrderId,

        /// Name the guest will act under
        #[arg(short, long)]
        name: String,
    },
    /// Mint an admin link for an order
    AdminLink {
        /// Order the link grants admin standing for
        #[arg(short, long)]
        order: OrderId,
    },
    /// Seed the database with demo orders
    Seed {
        /// YAML file describing orders to create (built-in demo if omitted)
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Invite { order, name } => commands::links::invite(order, &name)?,
        Commands::AdminLink { order } => commands::links::admin(order)?,
        Commands::Seed { file } => commands::seed::run(file.as_deref()).await?,
    }
    Ok(())
}

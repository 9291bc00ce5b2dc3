//! Tally CLI - Bank message categorization and sync
//!
//! Usage:
//!   tally init                      Initialize database
//!   tally ingest --file inbox.jsonl Ingest bank messages
//!   tally recurring                 Show recurring payments
//!   tally sync                      Upload pending transactions

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Ingest { file, limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_ingest(&db, &config, &file, limit).await
        }
        Commands::Classify { text, sender } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_classify(&db, &config, &text, sender.as_deref())
        }
        Commands::Transactions { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_transactions_list(&db, 20),
                Some(TransactionsAction::List { limit }) => {
                    commands::cmd_transactions_list(&db, limit)
                }
                Some(TransactionsAction::Show { id }) => commands::cmd_transactions_show(&db, &id),
            }
        }
        Commands::Recategorize {
            transaction_id,
            category_id,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_recategorize(&db, &config, &transaction_id, &category_id)
        }
        Commands::Categories { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(CategoriesAction::List) => commands::cmd_categories_list(&db),
                Some(CategoriesAction::Add { name, keywords }) => {
                    commands::cmd_categories_add(&db, &name, &keywords)
                }
                Some(CategoriesAction::Deactivate { id }) => {
                    commands::cmd_categories_deactivate(&db, &id)
                }
            }
        }
        Commands::Recurring { json } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_recurring(&db, &config, json)
        }
        Commands::Sync { endpoint } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_sync(&db, &config, endpoint.as_deref()).await
        }
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
    }
}

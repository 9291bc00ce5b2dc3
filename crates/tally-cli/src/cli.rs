//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - Turn bank SMS alerts into categorized, synced transactions
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Bank message categorization and sync engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "tally.db", global = true)]
    pub db: PathBuf,

    /// Config file (defaults to ~/.local/share/tally/config.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set TALLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed default categories
    Init,

    /// Ingest messages from a JSONL inbox export
    Ingest {
        /// File with one JSON message per line ({"id","sender","body","timestampMs"})
        #[arg(short, long)]
        file: PathBuf,

        /// Only look at this many of the most recent messages
        #[arg(short, long, default_value = "500")]
        limit: usize,
    },

    /// Run a single message through classifier, extractor and categorizer
    Classify {
        /// Message body
        text: String,

        /// Sender id (e.g. VM-HDFCBK), used as bank hint
        #[arg(long)]
        sender: Option<String>,
    },

    /// List or inspect transactions
    Transactions {
        #[command(subcommand)]
        action: Option<TransactionsAction>,
    },

    /// Manually set a transaction's category and learn from it
    Recategorize {
        /// Transaction id (UUID)
        transaction_id: String,

        /// Category id (see 'tally categories')
        category_id: String,
    },

    /// Manage categories
    Categories {
        #[command(subcommand)]
        action: Option<CategoriesAction>,
    },

    /// Show detected recurring payments and insights
    Recurring {
        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Upload pending transactions to the sync backend
    Sync {
        /// Backend base URL (overrides config and TALLY_SYNC_URL)
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Show database and sync status
    Status,
}

#[derive(Subcommand)]
pub enum TransactionsAction {
    /// List recent transactions
    List {
        /// Number of transactions to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show a single transaction
    Show {
        /// Transaction id (UUID)
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CategoriesAction {
    /// List all categories with their keywords
    List,

    /// Add a custom category
    Add {
        /// Display name (id is derived from it)
        name: String,

        /// Comma-separated keywords
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,
    },

    /// Deactivate a category (soft delete)
    Deactivate {
        /// Category id
        id: String,
    },
}

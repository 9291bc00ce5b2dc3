//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Shared utility to load configuration
//! - `cmd_init` - Initialize the database
//! - `cmd_classify` - Dry-run one message through the pipeline

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tally_core::categorize::{default_categories, CategoryRuleEngine};
use tally_core::classify::MessageClassifier;
use tally_core::config::TallyConfig;
use tally_core::db::Database;
use tally_core::extract::TransactionExtractor;
use tally_core::models::RawMessage;

use super::format_amount;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path is not valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load config from --config, the default location, or built-in defaults
pub fn load_config(config_path: Option<&Path>) -> Result<TallyConfig> {
    TallyConfig::load(config_path).context("Failed to load config")
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    let seeded = db
        .seed_default_categories()
        .context("Failed to seed default categories")?;
    println!("   Seeded {} default categories", seeded);

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Ingest messages: tally ingest --file inbox.jsonl");
    println!("  2. Review recurring payments: tally recurring");

    Ok(())
}

pub fn cmd_classify(
    db: &Database,
    config: &TallyConfig,
    text: &str,
    sender: Option<&str>,
) -> Result<()> {
    let classifier = MessageClassifier::new();

    println!();
    println!("🔎 Message Analysis");
    println!("   ─────────────────────────────────────────────────────────────");

    if !classifier.classify(text) {
        println!("   Financial: no (not a bank transaction alert)");
        return Ok(());
    }
    println!("   Financial: yes");

    let message = RawMessage {
        id: "cli".to_string(),
        sender: sender.unwrap_or_default().to_string(),
        body: text.to_string(),
        timestamp_ms: Utc::now().timestamp_millis(),
    };

    let candidate = match TransactionExtractor::new().extract_message(&message) {
        Ok(candidate) => candidate,
        Err(e) => {
            println!("   ❌ Extraction failed: {}", e);
            return Ok(());
        }
    };

    println!(
        "   Amount:    {}",
        format_amount(candidate.amount, candidate.direction)
    );
    println!("   Direction: {}", candidate.direction);
    println!("   Merchant:  {}", candidate.merchant_raw);
    if let Some(bank) = &candidate.bank_hint {
        println!("   Bank:      {}", bank);
    }

    let mut categories = db.get_active_categories()?;
    if categories.is_empty() {
        println!("   💡 Tip: Run 'tally init' to seed categories (using built-ins for now)");
        categories = default_categories();
    }

    let categorization =
        CategoryRuleEngine::new(config.min_category_score).categorize(&candidate, &categories);
    println!(
        "   Category:  {} ({}) confidence {:.2}",
        categorization.category_name, categorization.category_id, categorization.confidence
    );

    Ok(())
}

//! Transaction command implementations

use anyhow::{Context, Result};
use tally_core::categorize::CategoryRuleEngine;
use tally_core::config::TallyConfig;
use tally_core::db::Database;
use tally_core::models::datetime_from_ms;
use uuid::Uuid;

use super::{format_amount, truncate};

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).with_context(|| format!("Invalid transaction id: {}", id))
}

pub fn cmd_transactions_list(db: &Database, limit: i64) -> Result<()> {
    let transactions = db.list_transactions(limit, 0)?;

    if transactions.is_empty() {
        println!("No transactions found. Ingest some with:");
        println!("  tally ingest --file inbox.jsonl");
        return Ok(());
    }

    println!();
    println!("📝 Recent Transactions");
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in transactions {
        let sync_icon = match tx.sync_state {
            tally_core::models::SyncState::Synced => "☁️ ",
            tally_core::models::SyncState::SyncFailed => "⚠️ ",
            tally_core::models::SyncState::Unsynced => "  ",
        };
        println!(
            "   {} {} │ {:>12} │ {:14} │ {}",
            sync_icon,
            tx.timestamp().format("%Y-%m-%d"),
            format_amount(tx.amount, tx.direction),
            truncate(&tx.category_id, 14),
            truncate(&tx.merchant, 30)
        );
    }

    Ok(())
}

pub fn cmd_transactions_show(db: &Database, id: &str) -> Result<()> {
    let tx = db
        .get_transaction(parse_id(id)?)?
        .ok_or_else(|| anyhow::anyhow!("Transaction {} not found", id))?;

    println!();
    println!("📄 Transaction {}", tx.id);
    println!("   ─────────────────────────────────────────────────────────────");
    println!("   Date:       {}", tx.timestamp().format("%Y-%m-%d %H:%M UTC"));
    println!("   Amount:     {}", format_amount(tx.amount, tx.direction));
    println!("   Merchant:   {}", tx.merchant);
    println!(
        "   Category:   {} (confidence {:.2}{})",
        tx.category_id,
        tx.confidence,
        if tx.is_manually_categorized {
            ", manual"
        } else {
            ""
        }
    );
    if let Some(bank) = &tx.bank_name {
        println!("   Bank:       {}", bank);
    }
    println!("   Sync:       {}", tx.sync_state);
    if let Some(at) = tx.last_sync_attempt_ms {
        println!("   Last try:   {}", datetime_from_ms(at).format("%Y-%m-%d %H:%M UTC"));
    }
    println!("   Message:    {}", truncate(&tx.description, 60));

    Ok(())
}

pub fn cmd_recategorize(
    db: &Database,
    config: &TallyConfig,
    transaction_id: &str,
    category_id: &str,
) -> Result<()> {
    let engine = CategoryRuleEngine::new(config.min_category_score);
    let (tx, learned) = engine
        .apply_correction(db, parse_id(transaction_id)?, category_id)
        .context("Failed to recategorize transaction")?;

    println!(
        "✅ {} │ {} │ now in '{}'",
        truncate(&tx.merchant, 30),
        format_amount(tx.amount, tx.direction),
        tx.category_id
    );
    if learned.is_empty() {
        println!("   No new keywords learned");
    } else {
        println!("   🧠 Learned keywords: {}", learned.join(", "));
    }
    if tx.sync_state != tally_core::models::SyncState::Synced {
        println!("   Pending upload on next 'tally sync'");
    }

    Ok(())
}

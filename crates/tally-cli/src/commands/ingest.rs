//! Ingest command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::categorize::CategoryRuleEngine;
use tally_core::config::TallyConfig;
use tally_core::db::Database;
use tally_core::ingest::{Ingestor, JsonlMessageSource};
use tally_core::recurring::RecurringAnalyzer;
use tracing::info;

pub async fn cmd_ingest(
    db: &Database,
    config: &TallyConfig,
    file: &Path,
    limit: usize,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Message file not found: {}", file.display());
    }

    println!("📥 Ingesting messages from {}...", file.display());

    let analyzer = Arc::new(RecurringAnalyzer::new(
        db.clone(),
        config.recurring.clone(),
        config.history_ttl,
    ));
    let ingestor = Ingestor::new(db.clone(), CategoryRuleEngine::new(config.min_category_score))
        .with_analyzer(analyzer);

    let source = JsonlMessageSource::new(file);
    let report = ingestor
        .ingest(&source, limit)
        .await
        .context("Failed to ingest messages")?;

    info!("Ingest of {} finished", file.display());

    println!();
    println!("✅ Ingest complete!");
    println!("   Messages scanned:  {}", report.scanned);
    println!("   New transactions:  {}", report.inserted);
    if report.duplicates > 0 {
        println!("   Duplicates:        {} (skipped)", report.duplicates);
    }
    if report.not_financial > 0 {
        println!("   Not bank alerts:   {}", report.not_financial);
    }
    if report.parse_failures > 0 {
        println!("   ⚠️  Unparseable:     {}", report.parse_failures);
    }

    if report.inserted > 0 {
        println!();
        println!("💡 Run 'tally recurring' to review recurring payments");
    }

    Ok(())
}

//! Status command implementation

use std::fs;
use std::path::Path;

use anyhow::Result;
use tally_core::db::{Database, DB_KEY_ENV};

use super::open_db;

/// How the open database is protected
pub fn encryption_label(db: &Database) -> &'static str {
    if db.is_encrypted() {
        "🔒 encrypted (SQLCipher)"
    } else {
        "⚠️  unencrypted"
    }
}

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!();
    println!("📊 Tally Status");
    println!("   ─────────────────────────────────────────────────────────────");

    println!("   Database: {}", db_path.display());

    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    if !db_path.exists() {
        println!();
        return Ok(());
    }

    let db = match open_db(db_path, no_encrypt) {
        Ok(db) => db,
        Err(e) => {
            println!();
            println!("   ❌ Error opening database: {}", e);
            if !no_encrypt && !has_key {
                println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
            } else if has_key {
                println!("      (Check if {} is correct)", DB_KEY_ENV);
            }
            println!();
            return Ok(());
        }
    };

    println!("   Opened: {}", encryption_label(&db));

    let (unsynced, failed, synced) = db.count_by_sync_state()?;
    let active_categories = db.get_active_categories()?.len();

    println!();
    println!("   Transactions: {}", unsynced + failed + synced);
    println!("      Synced:   {}", synced);
    println!("      Pending:  {}", unsynced);
    if failed > 0 {
        println!("      ⚠️  Failed: {}", failed);
    }
    println!("   Active categories: {}", active_categories);

    match db.last_successful_sync()? {
        Some(at) => println!("   Last sync: {}", at.format("%Y-%m-%d %H:%M UTC")),
        None => println!("   Last sync: never"),
    }

    let runs = db.list_sync_runs(5)?;
    if !runs.is_empty() {
        println!();
        println!("   Recent sync runs:");
        for run in runs {
            println!(
                "      {} │ {:13} │ {:>4} synced │ {:>4} failed",
                run.started_at.format("%Y-%m-%d %H:%M"),
                run.status,
                run.synced_count,
                run.failed_count
            );
        }
    }

    println!();
    Ok(())
}

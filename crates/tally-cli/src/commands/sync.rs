//! Sync command implementation

use std::sync::Arc;

use anyhow::{Context, Result};
use tally_core::config::{TallyConfig, SYNC_TOKEN_ENV};
use tally_core::db::Database;
use tally_core::models::SyncRunStatus;
use tally_core::sync::{HttpSyncEndpoint, RateLimitPolicy, SyncReconciler, SyncWorker};
use tracing::warn;

pub async fn cmd_sync(db: &Database, config: &TallyConfig, endpoint: Option<&str>) -> Result<()> {
    let http = match endpoint {
        Some(url) => HttpSyncEndpoint::new(url, config.sync.token.clone(), config.sync.timeout),
        None => HttpSyncEndpoint::from_config(&config.sync),
    }
    .context("Failed to configure sync endpoint")?;

    if config.sync.token.is_none() {
        warn!("{} is not set; uploading without a bearer token", SYNC_TOKEN_ENV);
    }

    let policy = RateLimitPolicy::from(&config.sync);
    let reconciler = Arc::new(SyncReconciler::new(db.clone(), Arc::new(http), policy));
    let (handle, worker) = SyncWorker::spawn(reconciler);

    let before = handle.stats()?;
    let pending = before.unsynced_count + before.failed_count;
    if pending == 0 {
        println!("✅ Nothing to sync ({} already uploaded)", before.synced_count);
        return Ok(());
    }

    println!(
        "☁️  Syncing {} transactions (chunks of {}, {}ms apart)...",
        pending,
        policy.chunk_size,
        policy.inter_chunk_delay.as_millis()
    );

    let mut reply = handle
        .request()
        .ok_or_else(|| anyhow::anyhow!("A sync is already in progress"))?;

    let outcome = tokio::select! {
        outcome = &mut reply => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!("   ⏹️  Cancelling after the current chunk...");
            handle.cancel();
            reply.await
        }
    };
    drop(handle);
    worker.await.context("Sync worker panicked")?;

    let result = outcome
        .context("Sync worker stopped before replying")??
        .ok_or_else(|| anyhow::anyhow!("A sync is already in progress"))?;

    println!();
    match result.status {
        SyncRunStatus::Completed if result.failed_count == 0 => println!("✅ Sync complete!"),
        SyncRunStatus::Completed => println!("⚠️  Sync finished with failures"),
        SyncRunStatus::Cancelled => println!("⏹️  Sync cancelled"),
        SyncRunStatus::AuthRequired => println!("🔑 Sync stopped: authentication required"),
        SyncRunStatus::Failed => println!("❌ Sync failed"),
    }
    println!("   Uploaded:  {}", result.synced_count);
    if result.failed_count > 0 {
        println!("   Failed:    {} (will retry on next sync)", result.failed_count);
    }
    println!("   Chunks:    {}", result.batches.len());
    for error in &result.errors {
        println!("   ❌ {}", error);
    }

    if result.auth_required() {
        println!();
        println!("   Sign in again and set {} with a fresh token.", SYNC_TOKEN_ENV);
        anyhow::bail!("Sync backend rejected the credentials");
    }

    Ok(())
}

//! Sync reconciliation with the remote backend
//!
//! Unsynced transactions are uploaded in fixed-size chunks, strictly one
//! after another, with a delay between chunks. State transitions per
//! transaction:
//!
//! - `unsynced`/`sync_failed` → `synced` on success or HTTP 409 (already exists)
//! - `unsynced` → `sync_failed` on any other rejection or transport error (retried next run)
//! - HTTP 401 stops the run; the chunk's transactions keep their state
//!
//! Each chunk's state is committed only after its own upload resolves, so a
//! cancelled run leaves everything already committed in place.
//!
//! Only one run may be active at a time. A request that arrives while a run
//! is in flight is dropped and logged, never queued behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{SyncBatch, SyncResult, SyncRunStatus, SyncStats, Transaction};

mod http;

pub use http::HttpSyncEndpoint;

/// Source tag sent with every uploaded transaction
pub const SYNC_SOURCE: &str = "BANK";

/// One transaction as the backend expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: String,
    pub category: String,
    pub source: String,
    pub description: String,
    pub transaction_date: String,
    pub client_id: String,
}

impl From<&Transaction> for SyncItem {
    fn from(tx: &Transaction) -> Self {
        let description = if tx.description.is_empty() {
            tx.merchant.clone()
        } else {
            tx.description.clone()
        };
        Self {
            amount: tx.amount,
            kind: tx.direction.remote_type().to_string(),
            category: tx.category_id.clone(),
            source: SYNC_SOURCE.to_string(),
            description,
            transaction_date: tx
                .timestamp()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
            client_id: tx.id.to_string(),
        }
    }
}

/// Body of `POST /transactions/bulk`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkUploadRequest {
    pub transactions: Vec<SyncItem>,
}

impl BulkUploadRequest {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        Self {
            transactions: transactions.iter().map(SyncItem::from).collect(),
        }
    }
}

/// Backend reply to a successful bulk upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub inserted_ids: Vec<String>,
}

/// How the backend answered one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Inserted(BulkUploadResponse),
    /// HTTP 409: the backend already has these transactions
    AlreadyExists,
    /// HTTP 401: credentials missing or expired
    Unauthorized,
    Rejected { status: u16, message: String },
}

/// User-facing description of an HTTP status from the sync backend
pub fn status_message(status: u16) -> String {
    match status {
        400 => "Invalid transaction data".to_string(),
        401 => "Authentication required".to_string(),
        403 => "Access forbidden".to_string(),
        409 => "Transactions already exist".to_string(),
        429 => "Too many requests, try again later".to_string(),
        500..=599 => format!("Server error ({})", status),
        _ => format!("Sync failed with status {}", status),
    }
}

/// Remote store that accepts bulk uploads
#[async_trait]
pub trait SyncEndpoint: Send + Sync {
    async fn upload(&self, request: &BulkUploadRequest) -> Result<UploadOutcome>;
}

/// Chunking and pacing applied to a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            inter_chunk_delay: Duration::from_secs(2),
        }
    }
}

impl From<&SyncConfig> for RateLimitPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            inter_chunk_delay: config.inter_chunk_delay,
        }
    }
}

/// Clears the running flag when a run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Resolves once cancellation is signalled
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Reconciles local transactions with the remote store
pub struct SyncReconciler {
    db: Database,
    endpoint: Arc<dyn SyncEndpoint>,
    policy: RateLimitPolicy,
    running: AtomicBool,
    cancel_tx: watch::Sender<bool>,
}

impl SyncReconciler {
    pub fn new(db: Database, endpoint: Arc<dyn SyncEndpoint>, policy: RateLimitPolicy) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            db,
            endpoint,
            policy,
            running: AtomicBool::new(false),
            cancel_tx,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Whether a run is in flight
    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the in-flight run to stop at the next opportunity
    pub fn cancel(&self) {
        let sent = self.cancel_tx.send_if_modified(|cancel| {
            if self.is_syncing() && !*cancel {
                *cancel = true;
                true
            } else {
                false
            }
        });
        if sent {
            info!("Cancelling sync run");
        }
    }

    /// Claim the single run slot
    ///
    /// The cancel flag is cleared while holding the watch lock, so a
    /// `cancel()` made any time after this returns is seen by the run.
    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut began = false;
        self.cancel_tx.send_if_modified(|cancel| {
            began = self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            let reset = began && *cancel;
            if began {
                *cancel = false;
            }
            reset
        });
        began.then(|| RunGuard(&self.running))
    }

    /// Upload every unsynced or previously failed transaction
    ///
    /// Returns `None` when another run is already active.
    pub async fn sync_pending(&self) -> Result<Option<SyncResult>> {
        let Some(guard) = self.try_begin() else {
            info!("Sync already in progress, dropping request");
            return Ok(None);
        };
        let pending = self.db.get_unsynced()?;
        self.run(guard, pending).await.map(Some)
    }

    /// Upload the given transactions
    ///
    /// Returns `None` when another run is already active.
    pub async fn sync_batch(&self, pending: Vec<Transaction>) -> Result<Option<SyncResult>> {
        let Some(guard) = self.try_begin() else {
            info!("Sync already in progress, dropping request");
            return Ok(None);
        };
        self.run(guard, pending).await.map(Some)
    }

    /// Upload a single transaction
    ///
    /// `Ok(true)` when the backend accepted it (or already had it). A 401
    /// surfaces as [`Error::Unauthorized`].
    pub async fn sync_one(&self, tx: &Transaction) -> Result<bool> {
        let Some(_guard) = self.try_begin() else {
            info!("Sync already in progress, dropping single upload of {}", tx.id);
            return Ok(false);
        };

        let request = BulkUploadRequest::from_transactions(std::slice::from_ref(tx));
        let outcome = self.endpoint.upload(&request).await;
        let now_ms = Utc::now().timestamp_millis();

        match outcome {
            Ok(UploadOutcome::Inserted(_)) | Ok(UploadOutcome::AlreadyExists) => {
                self.db.mark_synced(&[tx.id], now_ms)?;
                Ok(true)
            }
            Ok(UploadOutcome::Unauthorized) => Err(Error::Unauthorized),
            Ok(UploadOutcome::Rejected { status, message }) => {
                warn!("Upload of {} rejected ({}): {}", tx.id, status, message);
                self.db.mark_sync_failed(&[tx.id], now_ms)?;
                Ok(false)
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", tx.id, e);
                self.db.mark_sync_failed(&[tx.id], now_ms)?;
                Ok(false)
            }
        }
    }

    /// Local sync counters and whether a run is active
    pub fn sync_stats(&self) -> Result<SyncStats> {
        let (unsynced_count, failed_count, synced_count) = self.db.count_by_sync_state()?;
        Ok(SyncStats {
            unsynced_count,
            failed_count,
            synced_count,
            last_sync_time: self.db.last_successful_sync()?,
            is_syncing: self.is_syncing(),
        })
    }

    async fn run(&self, _guard: RunGuard<'_>, pending: Vec<Transaction>) -> Result<SyncResult> {
        let mut cancel_rx = self.cancel_tx.subscribe();

        let run_id = self.db.start_sync_run()?;
        info!(
            "Sync run {} started: {} pending, chunks of {}",
            run_id,
            pending.len(),
            self.policy.chunk_size
        );

        match self.upload_chunks(&pending, &mut cancel_rx).await {
            Ok(result) => {
                self.db.finish_sync_run(run_id, &result)?;
                info!(
                    "Sync run {} {}: {} synced, {} failed",
                    run_id,
                    result.status.as_str(),
                    result.synced_count,
                    result.failed_count
                );
                Ok(result)
            }
            Err(e) => {
                warn!("Sync run {} aborted: {}", run_id, e);
                let mut failed = SyncResult::empty();
                failed.status = SyncRunStatus::Failed;
                failed.errors.push(e.to_string());
                if let Err(record_err) = self.db.finish_sync_run(run_id, &failed) {
                    warn!("Failed to record sync run {}: {}", run_id, record_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_chunks(
        &self,
        pending: &[Transaction],
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<SyncResult> {
        let chunk_size = self.policy.chunk_size.max(1);
        let mut result = SyncResult::empty();

        for (index, chunk) in pending.chunks(chunk_size).enumerate() {
            if index > 0 && !self.policy.inter_chunk_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.inter_chunk_delay) => {}
                    _ = cancelled(cancel_rx) => {
                        result.status = SyncRunStatus::Cancelled;
                        break;
                    }
                }
            }
            if *cancel_rx.borrow() {
                result.status = SyncRunStatus::Cancelled;
                break;
            }

            let ids: Vec<Uuid> = chunk.iter().map(|t| t.id).collect();
            let request = BulkUploadRequest::from_transactions(chunk);
            let attempted_at = Utc::now();
            debug!("Uploading chunk {} ({} transactions)", index + 1, ids.len());

            let outcome = tokio::select! {
                outcome = self.endpoint.upload(&request) => outcome,
                _ = cancelled(cancel_rx) => {
                    result.status = SyncRunStatus::Cancelled;
                    break;
                }
            };
            let now_ms = Utc::now().timestamp_millis();

            let mut batch = SyncBatch {
                transaction_ids: ids,
                chunk_size,
                attempted_at,
                synced_count: 0,
                failed_count: 0,
            };

            match outcome {
                Ok(UploadOutcome::Inserted(response)) => {
                    self.db.mark_synced(&batch.transaction_ids, now_ms)?;
                    batch.synced_count = batch.transaction_ids.len();
                    debug!(
                        "Chunk {} accepted: count={} inserted={}",
                        index + 1,
                        response.count,
                        response.inserted_ids.len()
                    );
                }
                Ok(UploadOutcome::AlreadyExists) => {
                    self.db.mark_synced(&batch.transaction_ids, now_ms)?;
                    batch.synced_count = batch.transaction_ids.len();
                    debug!("Chunk {} already on server, marked synced", index + 1);
                }
                Ok(UploadOutcome::Unauthorized) => {
                    warn!("Sync backend returned 401, stopping run");
                    result.errors.push(status_message(401));
                    result.status = SyncRunStatus::AuthRequired;
                    result.batches.push(batch);
                    break;
                }
                Ok(UploadOutcome::Rejected { status, message }) => {
                    warn!("Chunk {} rejected ({}): {}", index + 1, status, message);
                    self.db.mark_sync_failed(&batch.transaction_ids, now_ms)?;
                    batch.failed_count = batch.transaction_ids.len();
                    result.errors.push(format!("Chunk {}: {}", index + 1, message));
                }
                Err(e) => {
                    warn!("Chunk {} upload failed: {}", index + 1, e);
                    self.db.mark_sync_failed(&batch.transaction_ids, now_ms)?;
                    batch.failed_count = batch.transaction_ids.len();
                    result.errors.push(format!("Chunk {}: {}", index + 1, e));
                }
            }

            result.synced_count += batch.synced_count;
            result.failed_count += batch.failed_count;
            result.batches.push(batch);
        }

        Ok(result)
    }
}

type SyncReply = oneshot::Sender<Result<Option<SyncResult>>>;

/// Background task that runs sync requests one at a time
pub struct SyncWorker;

impl SyncWorker {
    /// Spawn the worker on the current runtime
    ///
    /// The worker stops once every [`SyncHandle`] is dropped.
    pub fn spawn(reconciler: Arc<SyncReconciler>) -> (SyncHandle, JoinHandle<()>) {
        let (requests, mut rx) = mpsc::channel::<SyncReply>(1);
        let worker_reconciler = reconciler.clone();

        let task = tokio::spawn(async move {
            while let Some(reply) = rx.recv().await {
                let result = worker_reconciler.sync_pending().await;
                if reply.send(result).is_err() {
                    debug!("Sync requester went away before the run finished");
                }
            }
            debug!("Sync worker stopped");
        });

        (
            SyncHandle {
                requests,
                reconciler,
            },
            task,
        )
    }
}

/// Cheap handle for submitting work to a [`SyncWorker`]
#[derive(Clone)]
pub struct SyncHandle {
    requests: mpsc::Sender<SyncReply>,
    reconciler: Arc<SyncReconciler>,
}

impl SyncHandle {
    /// Request a sync of all pending transactions
    ///
    /// Returns `None` (and logs) when a run is active or already queued.
    pub fn request(&self) -> Option<oneshot::Receiver<Result<Option<SyncResult>>>> {
        if self.reconciler.is_syncing() {
            info!("Sync already in progress, dropping request");
            return None;
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.requests.try_send(reply_tx) {
            Ok(()) => Some(reply_rx),
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!("Sync already queued, dropping request");
                None
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Sync worker has stopped");
                None
            }
        }
    }

    /// Cancel the in-flight run, if any
    pub fn cancel(&self) {
        self.reconciler.cancel();
    }

    pub fn stats(&self) -> Result<SyncStats> {
        self.reconciler.sync_stats()
    }
}

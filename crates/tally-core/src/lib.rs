//! Tally Core Library
//!
//! Turns bank SMS notifications into categorized transactions and keeps them
//! reconciled with a remote backend:
//! - Message classification (is this a bank transaction alert?)
//! - Transaction extraction (amount, direction, merchant, bank)
//! - Rule-based categorization with keyword learning from corrections
//! - Recurring payment detection across consecutive months
//! - Chunked, rate-limited sync with idempotent conflict handling
//! - Encrypted SQLite storage with a processed-message ledger

pub mod cache;
pub mod categorize;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod recurring;
pub mod sync;
pub mod text;

/// Test utilities including mock sync backend
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::TtlCache;
pub use categorize::{default_categories, CategoryRuleEngine};
pub use classify::MessageClassifier;
pub use config::{RecurringConfig, SyncConfig, TallyConfig};
pub use db::{Database, MessageOutcome, SyncRun};
pub use error::{Error, ExtractionError, Result};
pub use extract::TransactionExtractor;
pub use ingest::{Ingestor, JsonlMessageSource, MessageSource, VecMessageSource};
pub use recurring::{RecurringAnalyzer, RecurringPaymentDetector};
pub use sync::{
    BulkUploadRequest, BulkUploadResponse, HttpSyncEndpoint, RateLimitPolicy, SyncEndpoint,
    SyncHandle, SyncItem, SyncReconciler, SyncWorker, UploadOutcome,
};

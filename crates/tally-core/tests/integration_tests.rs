//! Integration tests for tally-core
//!
//! These tests exercise the full ingest → categorize → learn → recurring → sync workflow.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use tally_core::{
    categorize::CategoryRuleEngine,
    config::RecurringConfig,
    db::Database,
    ingest::{Ingestor, VecMessageSource},
    models::{Direction, Frequency, RawMessage, SyncState},
    recurring::RecurringAnalyzer,
    sync::{HttpSyncEndpoint, RateLimitPolicy, SyncReconciler, SyncWorker},
    test_utils::MockSyncServer,
};

fn ms(y: i32, m: u32, d: u32) -> i64 {
    Utc.with_ymd_and_hms(y, m, d, 9, 30, 0)
        .unwrap()
        .timestamp_millis()
}

fn sms(id: &str, sender: &str, body: &str, timestamp_ms: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        body: body.to_string(),
        timestamp_ms,
    }
}

/// Three months of two subscriptions, a salary credit, a one-off cafe visit and noise
fn quarter_of_messages() -> Vec<RawMessage> {
    let mut messages = Vec::new();
    for (i, month) in [1u32, 2, 3].into_iter().enumerate() {
        messages.push(sms(
            &format!("nf-{}", i),
            "VM-HDFCBK",
            &format!("Rs.649 debited from A/c XX1234 to NETFLIX on 05-0{}-25", month),
            ms(2025, month, 5),
        ));
        messages.push(sms(
            &format!("sp-{}", i),
            "JD-HDFCBK",
            &format!(
                "Rs.119.00 spent on HDFC Bank Card XX1234 at SPOTIFY on 12-0{}-25. Avl bal Rs.52,000",
                month
            ),
            ms(2025, month, 12),
        ));
    }
    messages.push(sms(
        "sal-1",
        "VM-HDFCBK",
        "Rs.85,000.00 credited to your A/c XX1234 by ACME CORP towards SALARY JAN",
        ms(2025, 1, 31),
    ));
    messages.push(sms(
        "cafe-1",
        "VM-HDFCBK",
        "Rs.120 debited from A/c XX1234 to CHAI POINT on 10-01-25",
        ms(2025, 1, 10),
    ));
    messages.push(sms(
        "otp",
        "VM-HDFCBK",
        "123456 is your OTP for login. Do not share it with anyone.",
        ms(2025, 1, 11),
    ));
    messages
}

fn setup() -> (Database, Arc<RecurringAnalyzer>, Ingestor) {
    let db = Database::in_memory().expect("Failed to create in-memory database");
    db.seed_default_categories().expect("Failed to seed categories");
    let analyzer = Arc::new(RecurringAnalyzer::new(
        db.clone(),
        RecurringConfig::default(),
        Duration::from_secs(60),
    ));
    let ingestor =
        Ingestor::new(db.clone(), CategoryRuleEngine::default()).with_analyzer(analyzer.clone());
    (db, analyzer, ingestor)
}

// =============================================================================
// Pipeline
// =============================================================================

#[tokio::test]
async fn test_full_ingest_workflow() {
    let (db, analyzer, ingestor) = setup();

    let report = ingestor
        .ingest(&VecMessageSource::new(quarter_of_messages()), 100)
        .await
        .expect("Ingest failed");
    assert_eq!(report.scanned, 9);
    assert_eq!(report.inserted, 8);
    assert_eq!(report.not_financial, 1);

    let all = db.get_all_transactions().unwrap();
    assert_eq!(all.len(), 8);
    assert!(all.iter().all(|t| t.amount > Decimal::ZERO));
    assert!(all.iter().all(|t| t.sync_state == SyncState::Unsynced));

    let salary = all.iter().find(|t| t.direction == Direction::Credit).unwrap();
    assert_eq!(salary.category_id, "salary");
    assert_eq!(salary.amount, Decimal::from(85_000));

    let netflix: Vec<_> = all.iter().filter(|t| t.merchant == "NETFLIX").collect();
    assert_eq!(netflix.len(), 3);
    assert!(netflix.iter().all(|t| t.category_id == "entertainment"));

    // Recurring detection over what was stored
    let (patterns, insights) = analyzer.insights().unwrap();
    let names: Vec<&str> = patterns
        .iter()
        .map(|p| p.normalized_merchant.as_str())
        .collect();
    assert_eq!(names, vec!["netflix", "spotify"]);
    assert!(patterns.iter().all(|p| p.consecutive_months == 3));
    assert!(patterns.iter().all(|p| p.frequency == Frequency::Monthly));
    assert_eq!(insights.total_recurring_count, 2);
    assert_eq!(insights.total_monthly_spend, Decimal::from(768));
}

#[tokio::test]
async fn test_correction_teaches_future_messages() {
    let (db, _analyzer, ingestor) = setup();
    ingestor
        .ingest(&VecMessageSource::new(quarter_of_messages()), 100)
        .await
        .unwrap();

    let cafe = db
        .get_all_transactions()
        .unwrap()
        .into_iter()
        .find(|t| t.merchant == "CHAI POINT")
        .unwrap();
    assert_eq!(cafe.category_id, "others");
    assert_eq!(cafe.confidence, 0.0);

    let engine = CategoryRuleEngine::default();
    let (corrected, learned) = engine.apply_correction(&db, cafe.id, "food").unwrap();
    assert!(corrected.is_manually_categorized);
    assert_eq!(corrected.confidence, 1.0);
    assert_eq!(learned, vec!["chai point".to_string()]);

    // Repeating the correction learns nothing new
    let (_, learned_again) = engine.apply_correction(&db, cafe.id, "food").unwrap();
    assert!(learned_again.is_empty());

    let later = VecMessageSource::new(vec![sms(
        "cafe-2",
        "VM-HDFCBK",
        "Rs.90 debited from A/c XX1234 to CHAI POINT on 20-03-25",
        ms(2025, 3, 20),
    )]);
    assert_eq!(ingestor.ingest(&later, 10).await.unwrap().inserted, 1);

    let second = db
        .get_all_transactions()
        .unwrap()
        .into_iter()
        .find(|t| t.source_message_id.as_deref() == Some("cafe-2"))
        .unwrap();
    assert_eq!(second.category_id, "food");
    assert!(!second.is_manually_categorized);
    assert!(second.confidence >= engine.min_score());
}

// =============================================================================
// Sync against the mock backend
// =============================================================================

fn reconciler_for(db: &Database, server: &MockSyncServer, token: &str) -> SyncReconciler {
    let endpoint = HttpSyncEndpoint::new(&server.url(), Some(token.to_string()), Duration::from_secs(5))
        .expect("Failed to build endpoint");
    SyncReconciler::new(
        db.clone(),
        Arc::new(endpoint),
        RateLimitPolicy {
            chunk_size: 5,
            inter_chunk_delay: Duration::ZERO,
        },
    )
}

#[tokio::test]
async fn test_sync_uploads_with_bearer_token() {
    let (db, _analyzer, ingestor) = setup();
    ingestor
        .ingest(&VecMessageSource::new(quarter_of_messages()), 100)
        .await
        .unwrap();

    let server = MockSyncServer::with_token("secret").await;
    // Second chunk already exists on the server
    server.script([201, 409]);
    let reconciler = reconciler_for(&db, &server, "secret");

    let result = reconciler.sync_pending().await.unwrap().unwrap();
    assert_eq!(result.synced_count, 8);
    assert_eq!(result.failed_count, 0);
    assert!(result.errors.is_empty());

    let received = server.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].transactions.len(), 5);
    assert_eq!(received[1].transactions.len(), 3);
    assert!(server
        .auth_headers()
        .iter()
        .all(|h| h.as_deref() == Some("Bearer secret")));

    // Oldest first: the January Netflix charge leads the first chunk
    let first = &received[0].transactions[0];
    assert_eq!(first.kind, "EXPENSE");
    assert_eq!(first.source, "BANK");
    assert_eq!(first.amount, Decimal::from(649));
    assert_eq!(first.transaction_date, "2025-01-05T09:30:00.000Z");

    let stats = reconciler.sync_stats().unwrap();
    assert_eq!(stats.synced_count, 8);
    assert_eq!(stats.unsynced_count, 0);
    assert!(stats.last_sync_time.is_some());
}

#[tokio::test]
async fn test_sync_bad_token_requires_reauth() {
    let (db, _analyzer, ingestor) = setup();
    ingestor
        .ingest(&VecMessageSource::new(quarter_of_messages()), 100)
        .await
        .unwrap();

    let server = MockSyncServer::with_token("secret").await;
    let reconciler = reconciler_for(&db, &server, "expired");

    let result = reconciler.sync_pending().await.unwrap().unwrap();
    assert!(result.auth_required());
    assert_eq!(result.synced_count, 0);
    assert_eq!(server.call_count(), 1);
    assert_eq!(result.batches.len(), 1);

    // Nothing was marked failed; everything is still pending
    let (unsynced, failed, synced) = db.count_by_sync_state().unwrap();
    assert_eq!((unsynced, failed, synced), (8, 0, 0));
}

#[tokio::test]
async fn test_server_errors_are_retried_through_worker() {
    let (db, _analyzer, ingestor) = setup();
    ingestor
        .ingest(&VecMessageSource::new(quarter_of_messages()), 100)
        .await
        .unwrap();

    let server = MockSyncServer::start().await;
    server.script([503, 201]);
    let reconciler = Arc::new(reconciler_for(&db, &server, "token"));
    let (handle, task) = SyncWorker::spawn(reconciler);

    let first = handle.request().unwrap().await.unwrap().unwrap().unwrap();
    assert_eq!(first.failed_count, 5);
    assert_eq!(first.synced_count, 3);
    assert_eq!(first.errors.len(), 1);
    assert!(first.errors[0].contains("Server error (503)"));
    assert_eq!(db.count_by_sync_state().unwrap(), (0, 5, 3));

    let retry = handle.request().unwrap().await.unwrap().unwrap().unwrap();
    assert_eq!(retry.synced_count, 5);
    assert_eq!(db.count_by_sync_state().unwrap(), (0, 0, 8));

    drop(handle);
    task.await.unwrap();
}

#[tokio::test]
async fn test_plain_text_success_marks_synced() {
    let (db, _analyzer, ingestor) = setup();
    ingestor
        .ingest(&VecMessageSource::new(quarter_of_messages()), 100)
        .await
        .unwrap();

    let server = MockSyncServer::start().await;
    server.reply_with_text("OK");
    let reconciler = reconciler_for(&db, &server, "token");

    let result = reconciler.sync_pending().await.unwrap().unwrap();
    assert_eq!(result.synced_count, 8);
    assert_eq!(result.failed_count, 0);
    assert!(result.errors.is_empty());
    assert_eq!(db.count_by_sync_state().unwrap(), (0, 0, 8));
}

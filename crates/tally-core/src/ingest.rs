//! Message ingestion pipeline
//!
//! raw message → classifier → extractor → rule engine → stored transaction
//!
//! Every message that reaches the pipeline is recorded in the processed
//! message ledger by content hash, so replaying the same inbox never inserts
//! twice. A second guard catches the same payment reported by two senders
//! (bank + wallet) by matching amount and merchant within a short window.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::categorize::CategoryRuleEngine;
use crate::classify::MessageClassifier;
use crate::db::{message_hash, Database, MessageOutcome};
use crate::error::{Error, Result};
use crate::extract::TransactionExtractor;
use crate::models::{Category, IngestReport, RawMessage, Transaction};
use crate::recurring::RecurringAnalyzer;

/// Same amount and merchant within this window counts as one payment
pub const NEAR_DUPLICATE_WINDOW_MS: i64 = 60_000;

/// Read-only provider of inbox messages
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Up to `limit` of the most recent messages, newest first
    async fn list_recent_messages(&self, limit: usize) -> Result<Vec<RawMessage>>;
}

fn most_recent(mut messages: Vec<RawMessage>, limit: usize) -> Vec<RawMessage> {
    messages.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
    messages.truncate(limit);
    messages
}

/// Messages held in memory
#[derive(Debug, Clone, Default)]
pub struct VecMessageSource {
    messages: Vec<RawMessage>,
}

impl VecMessageSource {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl MessageSource for VecMessageSource {
    async fn list_recent_messages(&self, limit: usize) -> Result<Vec<RawMessage>> {
        Ok(most_recent(self.messages.clone(), limit))
    }
}

/// Inbox export with one JSON message per line
///
/// ```text
/// {"id":"1","sender":"VM-HDFCBK","body":"Rs.500 debited ...","timestampMs":1735689600000}
/// ```
///
/// Blank lines are ignored; malformed lines are logged and skipped.
#[derive(Debug, Clone)]
pub struct JsonlMessageSource {
    path: PathBuf,
}

impl JsonlMessageSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MessageSource for JsonlMessageSource {
    async fn list_recent_messages(&self, limit: usize) -> Result<Vec<RawMessage>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut messages = Vec::new();

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawMessage>(line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(
                    "Skipping malformed message at {}:{}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ),
            }
        }

        debug!("Read {} messages from {}", messages.len(), self.path.display());
        Ok(most_recent(messages, limit))
    }
}

/// Runs messages through the pipeline and stores the results
pub struct Ingestor {
    db: Database,
    classifier: MessageClassifier,
    extractor: TransactionExtractor,
    engine: CategoryRuleEngine,
    analyzer: Option<Arc<RecurringAnalyzer>>,
}

impl Ingestor {
    pub fn new(db: Database, engine: CategoryRuleEngine) -> Self {
        Self {
            db,
            classifier: MessageClassifier::new(),
            extractor: TransactionExtractor::new(),
            engine,
            analyzer: None,
        }
    }

    /// Invalidate this analyzer's history cache whenever something is inserted
    pub fn with_analyzer(mut self, analyzer: Arc<RecurringAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Pull up to `limit` recent messages from `source` and process them oldest first
    pub async fn ingest(&self, source: &dyn MessageSource, limit: usize) -> Result<IngestReport> {
        let mut messages = source.list_recent_messages(limit).await?;
        messages.sort_by_key(|m| m.timestamp_ms);

        let categories = self.db.get_active_categories()?;
        if categories.is_empty() {
            return Err(Error::InvalidData(
                "No active categories; initialize the database first".to_string(),
            ));
        }

        let mut report = IngestReport {
            scanned: messages.len(),
            ..Default::default()
        };

        for message in &messages {
            match self.process_message(message, &categories)? {
                Some(MessageOutcome::NotFinancial) => report.not_financial += 1,
                Some(MessageOutcome::ParseFailed) => report.parse_failures += 1,
                Some(MessageOutcome::Duplicate) | None => report.duplicates += 1,
                Some(MessageOutcome::Inserted) => report.inserted += 1,
            }
        }

        if report.inserted > 0 {
            if let Some(analyzer) = &self.analyzer {
                analyzer.invalidate();
            }
        }

        info!(
            "Ingested {} messages: {} inserted, {} duplicates, {} not financial, {} unparseable",
            report.scanned,
            report.inserted,
            report.duplicates,
            report.not_financial,
            report.parse_failures
        );
        Ok(report)
    }

    /// Process one message; `None` means it was already handled in an earlier pass
    pub fn process_message(
        &self,
        message: &RawMessage,
        categories: &[Category],
    ) -> Result<Option<MessageOutcome>> {
        let hash = message_hash(message);
        if self.db.is_message_processed(&hash)? {
            debug!("Message {} already processed", message.id);
            return Ok(None);
        }

        if !self.classifier.classify(&message.body) {
            self.db
                .record_processed_message(&hash, &message.id, MessageOutcome::NotFinancial, None)?;
            return Ok(Some(MessageOutcome::NotFinancial));
        }

        let candidate = match self.extractor.extract_message(message) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Skipping message {} from {}: {}", message.id, message.sender, e);
                self.db
                    .record_processed_message(&hash, &message.id, MessageOutcome::ParseFailed, None)?;
                return Ok(Some(MessageOutcome::ParseFailed));
            }
        };

        let categorization = self.engine.categorize(&candidate, categories);
        let transaction = match Transaction::from_candidate(&candidate, &categorization) {
            Ok(tx) => tx,
            Err(e) => {
                warn!("Skipping message {}: {}", message.id, e);
                self.db
                    .record_processed_message(&hash, &message.id, MessageOutcome::ParseFailed, None)?;
                return Ok(Some(MessageOutcome::ParseFailed));
            }
        };

        if let Some(existing) = self.db.find_near_duplicate(
            transaction.amount,
            &transaction.merchant,
            transaction.timestamp_ms,
            NEAR_DUPLICATE_WINDOW_MS,
        )? {
            debug!(
                "Message {} duplicates transaction {} ({} at {})",
                message.id, existing, transaction.amount, transaction.merchant
            );
            let existing = existing.to_string();
            self.db.record_processed_message(
                &hash,
                &message.id,
                MessageOutcome::Duplicate,
                Some(&existing),
            )?;
            return Ok(Some(MessageOutcome::Duplicate));
        }

        self.db.insert_transaction(&transaction)?;
        let tx_id = transaction.id.to_string();
        self.db
            .record_processed_message(&hash, &message.id, MessageOutcome::Inserted, Some(&tx_id))?;
        debug!(
            "Stored {} {} at {} as {} ({:.2})",
            transaction.direction,
            transaction.amount,
            transaction.merchant,
            transaction.category_id,
            transaction.confidence
        );
        Ok(Some(MessageOutcome::Inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecurringConfig;
    use crate::models::{Direction, SyncState};
    use rust_decimal::Decimal;
    use std::io::Write;
    use std::time::Duration;

    fn msg(id: &str, sender: &str, body: &str, timestamp_ms: i64) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            sender: sender.to_string(),
            body: body.to_string(),
            timestamp_ms,
        }
    }

    fn setup() -> (Database, Ingestor) {
        let db = Database::in_memory().unwrap();
        db.seed_default_categories().unwrap();
        let ingestor = Ingestor::new(db.clone(), CategoryRuleEngine::default());
        (db, ingestor)
    }

    const T0: i64 = 1_735_689_600_000;

    #[tokio::test]
    async fn test_pipeline_counts_each_outcome() {
        let (db, ingestor) = setup();
        let source = VecMessageSource::new(vec![
            msg("1", "VM-HDFCBK", "Rs.500 debited from A/c XX1234 to AMAZON on 01-01-25", T0),
            msg("2", "AD-OFFERS", "Flat 50% off on all shoes this weekend!", T0 + 1_000),
            msg("3", "VM-SBIINB", "Amount debited via UPI from a/c XX12 ref 4455", T0 + 2_000),
            msg(
                "4",
                "JD-ICICIB",
                "INR 1,250.00 spent on ICICI Bank Card XX9876 at SWIGGY on 02-Jan. Avl bal INR 10,000",
                T0 + 86_400_000,
            ),
        ]);

        let report = ingestor.ingest(&source, 100).await.unwrap();
        assert_eq!(report.scanned, 4);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.not_financial, 1);
        assert_eq!(report.parse_failures, 1);
        assert_eq!(report.duplicates, 0);

        let stored = db.get_all_transactions().unwrap();
        assert_eq!(stored.len(), 2);
        let amazon = stored.iter().find(|t| t.merchant.contains("AMAZON")).unwrap();
        assert_eq!(amazon.amount, Decimal::from(500));
        assert_eq!(amazon.direction, Direction::Debit);
        assert_eq!(amazon.category_id, "shopping");
        assert_eq!(amazon.sync_state, SyncState::Unsynced);
        assert_eq!(amazon.source_message_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_replay_is_suppressed() {
        let (db, ingestor) = setup();
        let source = VecMessageSource::new(vec![msg(
            "1",
            "VM-HDFCBK",
            "Rs.500 debited from A/c XX1234 to AMAZON on 01-01-25",
            T0,
        )]);

        assert_eq!(ingestor.ingest(&source, 10).await.unwrap().inserted, 1);
        let again = ingestor.ingest(&source, 10).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 1);
        assert_eq!(db.get_all_transactions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_payment_from_two_senders_stored_once() {
        let (db, ingestor) = setup();
        let source = VecMessageSource::new(vec![
            msg("1", "VM-HDFCBK", "Rs.799 debited from A/c XX1234 to NETFLIX on 05-01-25", T0),
            msg(
                "2",
                "VM-PAYTMB",
                "Rs 799 debited from your account to NETFLIX via UPI",
                T0 + 20_000,
            ),
        ]);

        let report = ingestor.ingest(&source, 10).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(db.get_all_transactions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent() {
        let (db, ingestor) = setup();
        let source = VecMessageSource::new(vec![
            msg("old", "VM-HDFCBK", "Rs.100 debited from A/c XX1234 to UBER on 01-01-25", T0),
            msg(
                "new",
                "VM-HDFCBK",
                "Rs.200 debited from A/c XX1234 to ZOMATO on 02-01-25",
                T0 + 86_400_000,
            ),
        ]);

        let report = ingestor.ingest(&source, 1).await.unwrap();
        assert_eq!(report.scanned, 1);
        let stored = db.get_all_transactions().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source_message_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_requires_seeded_categories() {
        let db = Database::in_memory().unwrap();
        let ingestor = Ingestor::new(db, CategoryRuleEngine::default());
        let result = ingestor.ingest(&VecMessageSource::default(), 10).await;
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_insert_invalidates_recurring_cache() {
        let (db, ingestor) = setup();
        let analyzer = Arc::new(RecurringAnalyzer::new(
            db.clone(),
            RecurringConfig::default(),
            Duration::from_secs(3600),
        ));
        let ingestor = ingestor.with_analyzer(analyzer.clone());

        // Warm the cache with an empty history
        assert!(analyzer.patterns().unwrap().is_empty());

        let day = 86_400_000;
        let source = VecMessageSource::new(
            (0..3)
                .map(|i| {
                    msg(
                        &format!("m{}", i),
                        "VM-HDFCBK",
                        "Rs.499 debited from A/c XX1234 to NETFLIX",
                        T0 + i * 31 * day,
                    )
                })
                .collect(),
        );
        assert_eq!(ingestor.ingest(&source, 10).await.unwrap().inserted, 3);

        let patterns = analyzer.patterns().unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].normalized_merchant, "netflix");
    }

    #[tokio::test]
    async fn test_jsonl_source_skips_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"id":"1","sender":"VM-HDFCBK","body":"Rs.10 debited from a/c","timestampMs":1}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(
            file,
            r#"{{"id":"2","sender":"VM-HDFCBK","body":"Rs.20 debited from a/c","timestampMs":2}}"#
        )
        .unwrap();

        let source = JsonlMessageSource::new(file.path());
        let messages = source.list_recent_messages(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "2");

        let limited = source.list_recent_messages(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, "2");
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_error() {
        let source = JsonlMessageSource::new("/nonexistent/inbox.jsonl");
        assert!(matches!(
            source.list_recent_messages(10).await,
            Err(Error::Io(_))
        ));
    }
}

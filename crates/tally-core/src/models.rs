//! Data models for Tally

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Category id used when no rule clears the score threshold
pub const UNCATEGORIZED: &str = "others";

/// A raw notification message as exported from the device inbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub timestamp_ms: i64,
}

/// Money movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
        }
    }

    /// Transaction type label used by the sync backend
    pub fn remote_type(&self) -> &'static str {
        match self {
            Self::Credit => "INCOME",
            Self::Debit => "EXPENSE",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provisional transaction extracted from a message, not yet categorized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionCandidate {
    pub amount: Decimal,
    pub direction: Direction,
    pub merchant_raw: String,
    pub bank_hint: Option<String>,
    pub timestamp_ms: i64,
    pub source_message_id: String,
    /// Full message text, scored alongside the merchant during categorization
    pub description: String,
}

/// Upload state of a persisted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Unsynced,
    Synced,
    /// Last upload attempt failed; still eligible for retry
    SyncFailed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsynced => "unsynced",
            Self::Synced => "synced",
            Self::SyncFailed => "sync_failed",
        }
    }
}

impl std::str::FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unsynced" => Ok(Self::Unsynced),
            "synced" => Ok(Self::Synced),
            "sync_failed" => Ok(Self::SyncFailed),
            _ => Err(format!("Unknown sync state: {}", s)),
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of running the rule engine over a candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Categorization {
    pub category_id: String,
    pub category_name: String,
    /// Match score clamped to [0, 1]
    pub confidence: f64,
}

impl Categorization {
    pub fn uncategorized() -> Self {
        Self {
            category_id: UNCATEGORIZED.to_string(),
            category_name: "Others".to_string(),
            confidence: 0.0,
        }
    }
}

/// A persisted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub amount: Decimal,
    pub direction: Direction,
    pub merchant: String,
    pub category_id: String,
    pub confidence: f64,
    pub timestamp_ms: i64,
    pub description: String,
    pub bank_name: Option<String>,
    pub is_manually_categorized: bool,
    pub sync_state: SyncState,
    pub last_sync_attempt_ms: Option<i64>,
    pub source_message_id: Option<String>,
}

impl Transaction {
    /// Build an unsynced transaction from a categorized candidate
    ///
    /// Rejects non-positive amounts so a parse slip can never persist a
    /// zero-value record.
    pub fn from_candidate(
        candidate: &TransactionCandidate,
        categorization: &Categorization,
    ) -> Result<Self> {
        if candidate.amount <= Decimal::ZERO {
            return Err(Error::InvalidData(format!(
                "Transaction amount must be positive, got {}",
                candidate.amount
            )));
        }

        let merchant = if candidate.merchant_raw.trim().is_empty() {
            UNKNOWN_MERCHANT.to_string()
        } else {
            candidate.merchant_raw.trim().to_string()
        };

        Ok(Self {
            id: Uuid::new_v4(),
            amount: candidate.amount,
            direction: candidate.direction,
            merchant,
            category_id: categorization.category_id.clone(),
            confidence: categorization.confidence.clamp(0.0, 1.0),
            timestamp_ms: candidate.timestamp_ms,
            description: candidate.description.clone(),
            bank_name: candidate.bank_hint.clone(),
            is_manually_categorized: false,
            sync_state: SyncState::Unsynced,
            last_sync_attempt_ms: None,
            source_message_id: Some(candidate.source_message_id.clone())
                .filter(|id| !id.is_empty()),
        })
    }

    /// Apply a manual category override
    pub fn recategorize(&mut self, category_id: &str) {
        self.category_id = category_id.to_string();
        self.is_manually_categorized = true;
        self.confidence = 1.0;
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        datetime_from_ms(self.timestamp_ms)
    }

    /// Calendar month the transaction falls in (UTC)
    pub fn year_month(&self) -> YearMonth {
        YearMonth::from(self.timestamp())
    }
}

/// Merchant name stored when extraction found nothing usable
pub const UNKNOWN_MERCHANT: &str = "Unknown";

/// Convert epoch milliseconds to a UTC timestamp, clamping out-of-range values to the epoch
pub fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// A spending category with its keyword rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub keywords: BTreeSet<String>,
    /// Keywords added from manual corrections; also present in `keywords`
    pub learned_keywords: BTreeSet<String>,
    pub is_default: bool,
    pub is_active: bool,
    /// Lower values are evaluated first
    pub priority: i32,
}

/// A calendar month, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn next(&self) -> Self {
        if self.month >= 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }
}

impl From<DateTime<Utc>> for YearMonth {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::new(dt.year(), dt.month())
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Charge cadence of a recurring payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
        }
    }

    /// Scale a single charge to its per-month equivalent
    pub fn monthly_equivalent(&self, charge: Decimal) -> Decimal {
        match self {
            Self::Weekly => charge * Decimal::from(52) / Decimal::from(12),
            Self::Monthly => charge,
            Self::Quarterly => charge / Decimal::from(3),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Month-over-month price movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of service a recurring merchant provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTag {
    Streaming,
    Music,
    Telecom,
    Bills,
    Fitness,
    Food,
    Subscription,
}

impl ServiceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "Streaming",
            Self::Music => "Music",
            Self::Telecom => "Telecom",
            Self::Bills => "Bills",
            Self::Fitness => "Fitness",
            Self::Food => "Food",
            Self::Subscription => "Subscription",
        }
    }
}

impl std::fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A detected periodic payment, recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringPaymentPattern {
    pub normalized_merchant: String,
    /// Most common raw spelling of the merchant
    pub display_merchant: String,
    /// Total charged per month across the qualifying run
    pub monthly_amounts: BTreeMap<YearMonth, Decimal>,
    /// Billing periods in the qualifying run; quarters for quarterly charges
    pub consecutive_months: u32,
    pub frequency: Frequency,
    pub trend: Trend,
    /// Mean single charge over the qualifying run
    pub average_amount: Decimal,
    pub monthly_equivalent: Decimal,
    pub last_charge_ms: i64,
    pub confidence: f64,
    pub service_tag: ServiceTag,
}

/// Summary statistics over all detected recurring payments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringInsights {
    pub total_recurring_count: usize,
    pub total_monthly_spend: Decimal,
    pub top_patterns: Vec<RecurringPaymentPattern>,
    pub potential_savings: Decimal,
    pub savings_suggestion: Option<String>,
    pub insight_text: String,
}

/// One chunk of a sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncBatch {
    pub transaction_ids: Vec<Uuid>,
    pub chunk_size: usize,
    pub attempted_at: DateTime<Utc>,
    pub synced_count: usize,
    pub failed_count: usize,
}

/// How a sync run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Completed,
    /// Backend answered 401; remaining chunks were not attempted
    AuthRequired,
    Cancelled,
    /// A local error (database) stopped the run
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::AuthRequired => "auth_required",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Result of a sync run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    pub synced_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
    pub status: SyncRunStatus,
    /// Chunks actually attempted, in order
    pub batches: Vec<SyncBatch>,
}

impl SyncResult {
    pub fn empty() -> Self {
        Self {
            synced_count: 0,
            failed_count: 0,
            errors: Vec::new(),
            status: SyncRunStatus::Completed,
            batches: Vec::new(),
        }
    }

    pub fn auth_required(&self) -> bool {
        self.status == SyncRunStatus::AuthRequired
    }
}

/// Snapshot of local sync progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    pub unsynced_count: i64,
    pub failed_count: i64,
    pub synced_count: i64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_syncing: bool,
}

/// Counts from one ingestion pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub scanned: usize,
    pub not_financial: usize,
    pub parse_failures: usize,
    pub duplicates: usize,
    pub inserted: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn candidate(amount: Decimal) -> TransactionCandidate {
        TransactionCandidate {
            amount,
            direction: Direction::Debit,
            merchant_raw: "AMAZON".to_string(),
            bank_hint: Some("HDFC Bank".to_string()),
            timestamp_ms: 1_735_689_600_000,
            source_message_id: "m1".to_string(),
            description: "Rs.500 debited to AMAZON".to_string(),
        }
    }

    #[test]
    fn test_from_candidate_rejects_zero_amount() {
        let result = Transaction::from_candidate(
            &candidate(Decimal::ZERO),
            &Categorization::uncategorized(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_recategorize_sets_manual_confidence() {
        let mut tx = Transaction::from_candidate(
            &candidate(Decimal::from(500)),
            &Categorization::uncategorized(),
        )
        .unwrap();
        assert_eq!(tx.confidence, 0.0);
        assert_eq!(tx.sync_state, SyncState::Unsynced);

        tx.recategorize("shopping");
        assert_eq!(tx.category_id, "shopping");
        assert!(tx.is_manually_categorized);
        assert_eq!(tx.confidence, 1.0);
    }

    #[test]
    fn test_year_month_rollover() {
        assert_eq!(YearMonth::new(2024, 12).next(), YearMonth::new(2025, 1));
        assert_eq!(YearMonth::new(2025, 1).next(), YearMonth::new(2025, 2));
        assert_eq!(YearMonth::new(2025, 3).to_string(), "2025-03");
    }

    #[test]
    fn test_enum_string_roundtrip() {
        assert_eq!(Direction::from_str("debit").unwrap(), Direction::Debit);
        assert_eq!(SyncState::from_str("sync_failed").unwrap(), SyncState::SyncFailed);
        assert!(SyncState::from_str("pending").is_err());
        assert_eq!(Direction::Credit.remote_type(), "INCOME");
    }

    #[test]
    fn test_monthly_equivalent() {
        let charge = Decimal::from(120);
        assert_eq!(Frequency::Monthly.monthly_equivalent(charge), Decimal::from(120));
        assert_eq!(Frequency::Quarterly.monthly_equivalent(charge), Decimal::from(40));
        assert_eq!(Frequency::Weekly.monthly_equivalent(charge), Decimal::from(520));
    }
}

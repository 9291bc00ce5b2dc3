//! Recurring payment detection
//!
//! A merchant counts as recurring when its debits show up in at least three
//! consecutive calendar months (configurable) and each month's charge stays
//! within a tolerance of the running average. The consecutive-month rule is
//! what separates a subscription from a shop the user simply visits often.
//! Quarterly billing never fills consecutive months, so a merchant that fails
//! the monthly rule may still qualify with the same number of stable charges
//! landing exactly three calendar months apart.
//!
//! Patterns are never stored. They are recomputed from the transaction
//! history every time they are requested; [`RecurringAnalyzer`] keeps a short
//! TTL cache of that history.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::cache::TtlCache;
use crate::config::RecurringConfig;
use crate::db::Database;
use crate::error::Result;
use crate::models::{
    Direction, Frequency, RecurringInsights, RecurringPaymentPattern, ServiceTag, Transaction,
    Trend, YearMonth, UNKNOWN_MERCHANT,
};
use crate::text::{contains_term, normalize_merchant};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Number of patterns surfaced in insights
const TOP_PATTERNS: usize = 3;

/// Merchant keywords identifying the kind of service
const SERVICE_TAGS: &[(ServiceTag, &[&str])] = &[
    (
        ServiceTag::Streaming,
        &["netflix", "prime video", "amazon prime", "hotstar", "disney", "zee5", "sonyliv", "youtube"],
    ),
    (
        ServiceTag::Music,
        &["spotify", "gaana", "wynk", "apple music", "jiosaavn", "saavn"],
    ),
    (
        ServiceTag::Telecom,
        &["jio", "airtel", "vodafone", "bsnl"],
    ),
    (
        ServiceTag::Bills,
        &["electricity", "water", "gas", "broadband", "insurance", "bescom"],
    ),
    (ServiceTag::Fitness, &["gym", "cult", "fitness", "yoga"]),
    (ServiceTag::Food, &["swiggy", "zomato"]),
];

impl ServiceTag {
    /// Services where paying for two providers at once is usually redundant
    pub fn is_discretionary(&self) -> bool {
        matches!(self, Self::Streaming | Self::Music | Self::Fitness | Self::Food)
    }
}

/// Tag a normalized merchant with the kind of service it sells
pub fn service_tag_for(normalized_merchant: &str) -> ServiceTag {
    SERVICE_TAGS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| contains_term(normalized_merchant, k)))
        .map(|(tag, _)| *tag)
        .unwrap_or(ServiceTag::Subscription)
}

/// Charges for one merchant in one calendar month
#[derive(Debug, Default)]
struct MonthBucket<'a> {
    total: Decimal,
    charges: Vec<&'a Transaction>,
}

impl MonthBucket<'_> {
    fn average_charge(&self) -> Decimal {
        if self.charges.is_empty() {
            Decimal::ZERO
        } else {
            self.total / Decimal::from(self.charges.len() as u64)
        }
    }
}

/// Detects recurring payments in a transaction history
#[derive(Debug, Clone, Default)]
pub struct RecurringPaymentDetector {
    config: RecurringConfig,
}

impl RecurringPaymentDetector {
    pub fn new(config: RecurringConfig) -> Self {
        Self { config }
    }

    /// Find all recurring patterns; an empty history yields an empty list
    pub fn detect(&self, transactions: &[Transaction]) -> Vec<RecurringPaymentPattern> {
        let mut groups: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
        for tx in transactions.iter().filter(|t| t.direction == Direction::Debit) {
            if tx.merchant.eq_ignore_ascii_case(UNKNOWN_MERCHANT) {
                continue;
            }
            let key = normalize_merchant(&tx.merchant);
            if key.is_empty() {
                continue;
            }
            groups.entry(key).or_default().push(tx);
        }

        let mut patterns: Vec<RecurringPaymentPattern> = groups
            .into_iter()
            .filter_map(|(merchant, mut charges)| {
                charges.sort_by_key(|t| t.timestamp_ms);
                self.detect_merchant(merchant, &charges)
            })
            .collect();

        patterns.sort_by(|a, b| {
            b.monthly_equivalent
                .cmp(&a.monthly_equivalent)
                .then_with(|| a.normalized_merchant.cmp(&b.normalized_merchant))
        });
        debug!("Detected {} recurring patterns", patterns.len());
        patterns
    }

    fn detect_merchant(
        &self,
        normalized_merchant: String,
        charges: &[&Transaction],
    ) -> Option<RecurringPaymentPattern> {
        let mut months: BTreeMap<YearMonth, MonthBucket> = BTreeMap::new();
        for tx in charges {
            let bucket = months.entry(tx.year_month()).or_default();
            bucket.total += tx.amount;
            bucket.charges.push(tx);
        }

        let min_run = self.config.min_consecutive_months as usize;
        let mut run = self.longest_stable_run(&months, 1);
        if run.len() < min_run {
            run = self.longest_stable_run(&months, 3);
            if run.len() < min_run {
                return None;
            }
        }

        let run_buckets: Vec<(&YearMonth, &MonthBucket)> = run
            .iter()
            .filter_map(|ym| months.get_key_value(ym))
            .collect();
        let run_charges: Vec<&Transaction> = run_buckets
            .iter()
            .flat_map(|(_, bucket)| bucket.charges.iter().copied())
            .collect();

        let (frequency, regularity) = classify_frequency(&run_charges)?;

        let monthly_averages: Vec<Decimal> =
            run_buckets.iter().map(|(_, b)| b.average_charge()).collect();
        let trend = self.trend(&monthly_averages);

        let total: Decimal = run_charges.iter().map(|t| t.amount).sum();
        let average_amount = (total / Decimal::from(run_charges.len() as u64)).round_dp(2);
        let latest_charge = monthly_averages.last().copied().unwrap_or(average_amount);
        let last_charge_ms = run_charges.last().map(|t| t.timestamp_ms)?;

        let stability = self.stability(&monthly_averages);
        let months_score = (run.len() as f64 / 6.0).min(1.0);
        let confidence = (0.4 * months_score + 0.4 * stability + 0.2 * regularity).clamp(0.0, 1.0);

        debug!(
            "Recurring: {} ({} months, {}, {})",
            normalized_merchant,
            run.len(),
            frequency,
            trend
        );

        Some(RecurringPaymentPattern {
            display_merchant: most_common_spelling(&run_charges),
            monthly_amounts: run_buckets
                .iter()
                .map(|(ym, bucket)| (**ym, bucket.total))
                .collect(),
            consecutive_months: run.len() as u32,
            frequency,
            trend,
            average_amount,
            monthly_equivalent: frequency.monthly_equivalent(latest_charge).round_dp(2),
            last_charge_ms,
            confidence: (confidence * 100.0).round() / 100.0,
            service_tag: service_tag_for(&normalized_merchant),
            normalized_merchant,
        })
    }

    /// Longest run of charged months, each `step` months after the previous,
    /// whose average charge stays within tolerance of the run's mean so far;
    /// later runs win ties
    fn longest_stable_run(
        &self,
        months: &BTreeMap<YearMonth, MonthBucket>,
        step: u32,
    ) -> Vec<YearMonth> {
        let mut best: Vec<YearMonth> = Vec::new();
        let mut current: Vec<YearMonth> = Vec::new();
        let mut current_sum = 0.0;

        for (ym, bucket) in months {
            let amount = bucket.average_charge().to_f64().unwrap_or(0.0);
            let extends = match current.last() {
                Some(last) if (0..step).fold(*last, |m, _| m.next()) == *ym => {
                    let mean = current_sum / current.len() as f64;
                    mean > 0.0 && (amount - mean).abs() <= self.config.amount_tolerance * mean
                }
                _ => false,
            };

            if !extends {
                current.clear();
                current_sum = 0.0;
            }
            current.push(*ym);
            current_sum += amount;

            if current.len() >= best.len() {
                best = current.clone();
            }
        }
        best
    }

    fn trend(&self, monthly_averages: &[Decimal]) -> Trend {
        let [.., previous, latest] = monthly_averages else {
            return Trend::Stable;
        };
        let (Some(previous), Some(latest)) = (previous.to_f64(), latest.to_f64()) else {
            return Trend::Stable;
        };
        if previous <= 0.0 {
            return Trend::Stable;
        }

        let change = (latest - previous) / previous;
        if change > self.config.trend_threshold {
            Trend::Increasing
        } else if change < -self.config.trend_threshold {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// 1.0 for identical monthly charges, falling to 0.0 as the coefficient
    /// of variation reaches the amount tolerance
    fn stability(&self, monthly_averages: &[Decimal]) -> f64 {
        let values: Vec<f64> = monthly_averages.iter().filter_map(|d| d.to_f64()).collect();
        if values.is_empty() {
            return 0.0;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        if mean <= 0.0 {
            return 0.0;
        }
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let cv = variance.sqrt() / mean;
        if self.config.amount_tolerance <= 0.0 {
            return if cv == 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - (cv / self.config.amount_tolerance).clamp(0.0, 1.0)
    }

    /// Summarize detected patterns
    pub fn insights(&self, patterns: &[RecurringPaymentPattern]) -> RecurringInsights {
        let total_monthly_spend: Decimal = patterns.iter().map(|p| p.monthly_equivalent).sum();

        let mut ranked: Vec<&RecurringPaymentPattern> = patterns.iter().collect();
        ranked.sort_by(|a, b| b.monthly_equivalent.cmp(&a.monthly_equivalent));
        let top_patterns: Vec<RecurringPaymentPattern> =
            ranked.iter().take(TOP_PATTERNS).map(|p| (*p).clone()).collect();

        // Redundant services: every pattern in a discretionary tag except the priciest
        let mut by_tag: HashMap<ServiceTag, Vec<&RecurringPaymentPattern>> = HashMap::new();
        for pattern in &ranked {
            if pattern.service_tag.is_discretionary() {
                by_tag.entry(pattern.service_tag).or_default().push(*pattern);
            }
        }
        let mut duplicate_tags: Vec<(ServiceTag, Vec<&RecurringPaymentPattern>)> = by_tag
            .into_iter()
            .filter(|(_, group)| group.len() > 1)
            .collect();
        duplicate_tags.sort_by_key(|(tag, _)| *tag);

        let mut flagged: BTreeMap<&str, Decimal> = BTreeMap::new();
        for (_, group) in &duplicate_tags {
            for pattern in group.iter().skip(1) {
                flagged.insert(&pattern.normalized_merchant, pattern.monthly_equivalent);
            }
        }
        for pattern in patterns.iter().filter(|p| p.trend == Trend::Decreasing) {
            flagged.insert(&pattern.normalized_merchant, pattern.monthly_equivalent);
        }
        let potential_savings: Decimal = flagged.values().copied().sum::<Decimal>().round_dp(2);

        let savings_suggestion = if let Some((tag, group)) = duplicate_tags.first() {
            let names: Vec<&str> = group.iter().map(|p| p.display_merchant.as_str()).collect();
            Some(format!(
                "You pay for {} {} services ({}). Keeping only one could save about ₹{} a month.",
                group.len(),
                tag.as_str().to_lowercase(),
                names.join(", "),
                potential_savings
            ))
        } else if potential_savings > Decimal::ZERO {
            Some(format!(
                "Some recurring charges are dropping; reviewing them could free up about ₹{} a month.",
                potential_savings
            ))
        } else {
            None
        };

        let insight_text = if patterns.is_empty() {
            "No recurring payments detected yet.".to_string()
        } else {
            let names: Vec<&str> = top_patterns
                .iter()
                .map(|p| p.display_merchant.as_str())
                .collect();
            format!(
                "We detected {} recurring payment{} costing about ₹{} a month. Largest: {}.",
                patterns.len(),
                if patterns.len() == 1 { "" } else { "s" },
                total_monthly_spend.round_dp(2),
                names.join(", ")
            )
        };

        RecurringInsights {
            total_recurring_count: patterns.len(),
            total_monthly_spend: total_monthly_spend.round_dp(2),
            top_patterns,
            potential_savings,
            savings_suggestion,
            insight_text,
        }
    }
}

/// Modal gap between charges, with the share of gaps that matched it
fn classify_frequency(charges: &[&Transaction]) -> Option<(Frequency, f64)> {
    let gaps: Vec<f64> = charges
        .windows(2)
        .map(|w| (w[1].timestamp_ms - w[0].timestamp_ms) as f64 / MS_PER_DAY)
        .collect();
    if gaps.is_empty() {
        return None;
    }

    let label = |days: f64| -> Option<Frequency> {
        let days = days.round();
        if (5.0..=9.0).contains(&days) {
            Some(Frequency::Weekly)
        } else if (25.0..=35.0).contains(&days) {
            Some(Frequency::Monthly)
        } else if (80.0..=100.0).contains(&days) {
            Some(Frequency::Quarterly)
        } else {
            None
        }
    };

    let mut counts = [
        (Frequency::Monthly, 0usize),
        (Frequency::Weekly, 0usize),
        (Frequency::Quarterly, 0usize),
    ];
    for gap in &gaps {
        if let Some(freq) = label(*gap) {
            if let Some(entry) = counts.iter_mut().find(|(f, _)| *f == freq) {
                entry.1 += 1;
            }
        }
    }

    // Earlier entries win ties, so Monthly is preferred
    let (frequency, count) = counts
        .iter()
        .copied()
        .fold(None, |best: Option<(Frequency, usize)>, (f, c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((f, c)),
        })?;
    // At least half the gaps must share the modal frequency
    if count == 0 || count * 2 < gaps.len() {
        return None;
    }
    Some((frequency, count as f64 / gaps.len() as f64))
}

fn most_common_spelling(charges: &[&Transaction]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tx in charges {
        *counts.entry(tx.merchant.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(&str, usize)>, (name, count)| match best {
            Some((_, bc)) if bc >= count => best,
            _ => Some((name, count)),
        })
        .map(|(name, _)| name.to_string())
        .unwrap_or_default()
}

/// Recurring detection over the stored history, with a TTL-cached snapshot
pub struct RecurringAnalyzer {
    db: Database,
    detector: RecurringPaymentDetector,
    history: TtlCache<Vec<Transaction>>,
    ttl: Duration,
}

impl RecurringAnalyzer {
    pub fn new(db: Database, config: RecurringConfig, ttl: Duration) -> Self {
        Self {
            db,
            detector: RecurringPaymentDetector::new(config),
            history: TtlCache::new(),
            ttl,
        }
    }

    fn history(&self) -> Result<Vec<Transaction>> {
        self.history
            .get_or_refresh(self.ttl, || self.db.get_all_transactions())
    }

    /// Current recurring patterns
    pub fn patterns(&self) -> Result<Vec<RecurringPaymentPattern>> {
        Ok(self.detector.detect(&self.history()?))
    }

    /// Current patterns together with their summary
    pub fn insights(&self) -> Result<(Vec<RecurringPaymentPattern>, RecurringInsights)> {
        let patterns = self.patterns()?;
        let insights = self.detector.insights(&patterns);
        Ok((patterns, insights))
    }

    /// Forget the cached history (call after new transactions are stored)
    pub fn invalidate(&self) {
        self.history.invalidate();
    }
}

//! Keyword rule engine for automatic transaction categorization
//!
//! Categorization order:
//! 1. learned keywords (from the user's manual corrections) matching the merchant
//! 2. the salary rule, for credits only
//! 3. keyword scoring over every active category, in priority order
//! 4. fallback to "others" with confidence 0.0
//!
//! Learning is a plain keyword-set mutation: when the user moves a
//! transaction to another category, the normalized merchant phrase is added to
//! that category so the next message from the same merchant lands there too.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    Categorization, Category, Direction, Transaction, TransactionCandidate, UNCATEGORIZED,
};
use crate::text::{contains_term, normalize_merchant};

/// Default minimum score a category must reach to be assigned
pub const DEFAULT_MIN_SCORE: f64 = 0.3;

/// Category id handled by the salary rule
pub const SALARY_CATEGORY: &str = "salary";

/// Score a salary candidate must exceed
const SALARY_THRESHOLD: f64 = 0.6;

/// Priority assigned to user-created categories (evaluated before defaults)
pub const CUSTOM_CATEGORY_PRIORITY: i32 = 5;

/// Seed data: (id, name, priority, keywords)
const DEFAULT_CATEGORIES: &[(&str, &str, i32, &[&str])] = &[
    (
        "salary",
        "Salary & Income",
        10,
        &["salary", "credited", "income", "bonus", "incentive", "refund", "cashback"],
    ),
    (
        "bills",
        "Bills & Utilities",
        20,
        &["electricity", "water", "gas", "internet", "mobile", "recharge", "broadband", "wifi", "postpaid"],
    ),
    (
        "education",
        "Education",
        30,
        &["fees", "course", "book", "education", "school", "college", "university", "tuition", "coaching"],
    ),
    (
        "healthcare",
        "Healthcare",
        40,
        &["hospital", "doctor", "medicine", "pharmacy", "medical", "health", "clinic", "apollo", "fortis"],
    ),
    (
        "entertainment",
        "Entertainment",
        50,
        &["netflix", "amazon prime", "hotstar", "spotify", "movie", "cinema", "theatre", "gaming", "youtube premium"],
    ),
    (
        "grocery",
        "Grocery",
        60,
        &["bigbasket", "grofers", "blinkit", "zepto", "dmart", "grocery", "supermarket", "vegetables", "fruits"],
    ),
    (
        "food",
        "Food & Dining",
        70,
        &["zomato", "swiggy", "restaurant", "cafe", "food", "dining", "pizza", "burger", "dominos", "kfc", "mcdonalds"],
    ),
    (
        "transport",
        "Transportation",
        80,
        &["uber", "ola", "metro", "bus", "petrol", "fuel", "taxi", "auto", "rapido", "namma yatri"],
    ),
    (
        "shopping",
        "Shopping",
        90,
        &["amazon", "flipkart", "myntra", "ajio", "shopping", "clothes", "fashion", "electronics", "gadgets"],
    ),
    (UNCATEGORIZED, "Others", 1000, &[]),
];

const SALARY_CADENCE_TERMS: &[&str] = &["monthly", "payroll"];

/// Merchant words that carry no identity of their own
const LEARNING_STOP_WORDS: &[&str] = &["unknown", "merchant", "payment", "bank", "transfer", "upi"];

/// Built-in categories seeded into a fresh database
pub fn default_categories() -> Vec<Category> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(id, name, priority, keywords)| Category {
            id: id.to_string(),
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            learned_keywords: BTreeSet::new(),
            is_default: true,
            is_active: true,
            priority: *priority,
        })
        .collect()
}

/// The text fields the engine scores against
struct ScoringInput<'a> {
    direction: Direction,
    amount: Decimal,
    merchant: &'a str,
    description: &'a str,
}

/// Rule-based categorizer
#[derive(Debug, Clone)]
pub struct CategoryRuleEngine {
    min_score: f64,
}

impl Default for CategoryRuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE)
    }
}

impl CategoryRuleEngine {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Assign a category to a freshly extracted candidate
    pub fn categorize(
        &self,
        candidate: &TransactionCandidate,
        categories: &[Category],
    ) -> Categorization {
        self.categorize_input(
            &ScoringInput {
                direction: candidate.direction,
                amount: candidate.amount,
                merchant: &candidate.merchant_raw,
                description: &candidate.description,
            },
            categories,
        )
    }

    /// Re-run automatic categorization over a stored transaction
    pub fn categorize_transaction(
        &self,
        transaction: &Transaction,
        categories: &[Category],
    ) -> Categorization {
        self.categorize_input(
            &ScoringInput {
                direction: transaction.direction,
                amount: transaction.amount,
                merchant: &transaction.merchant,
                description: &transaction.description,
            },
            categories,
        )
    }

    fn categorize_input(&self, input: &ScoringInput<'_>, categories: &[Category]) -> Categorization {
        let mut ordered: Vec<&Category> = categories
            .iter()
            .filter(|c| c.is_active && c.id != UNCATEGORIZED)
            .collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let merchant = input.merchant.to_lowercase();
        let text = format!("{} {}", merchant, input.description.to_lowercase());

        // User corrections win over everything else
        let normalized = normalize_merchant(input.merchant);
        if !normalized.is_empty() {
            if let Some(category) = ordered.iter().find(|c| {
                c.learned_keywords
                    .iter()
                    .any(|k| contains_term(&normalized, k))
            }) {
                let score = keyword_score(category, &merchant, &text).max(self.min_score);
                debug!("Learned keyword matched '{}' -> {}", input.merchant, category.id);
                return categorization(category, score);
            }
        }

        if input.direction == Direction::Credit {
            if let Some(salary) = ordered.iter().find(|c| c.id == SALARY_CATEGORY) {
                let score = salary_score(salary, input.amount, &text);
                if score > SALARY_THRESHOLD {
                    return categorization(salary, score);
                }
            }
        }

        let mut best: Option<(&Category, f64)> = None;
        for &category in &ordered {
            if category.id == SALARY_CATEGORY && input.direction == Direction::Debit {
                continue;
            }
            let score = keyword_score(category, &merchant, &text);
            // Strictly greater keeps the higher-priority category on ties
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((category, score));
            }
        }

        match best {
            Some((category, score)) if score.min(1.0) >= self.min_score => {
                categorization(category, score)
            }
            _ => categories
                .iter()
                .find(|c| c.id == UNCATEGORIZED)
                .map(|c| Categorization {
                    category_id: c.id.clone(),
                    category_name: c.name.clone(),
                    confidence: 0.0,
                })
                .unwrap_or_else(Categorization::uncategorized),
        }
    }

    /// Learn from a manual correction
    ///
    /// Adds the corrected transaction's merchant phrase to `chosen` and
    /// returns the keywords that were new. Calling this twice with the same
    /// transaction adds nothing the second time.
    pub fn update_category_rules(
        &self,
        corrected: &Transaction,
        chosen: &mut Category,
    ) -> Vec<String> {
        let Some(keyword) = salient_merchant_keyword(&corrected.merchant) else {
            return Vec::new();
        };

        let mut added = Vec::new();
        if chosen.learned_keywords.insert(keyword.clone()) {
            added.push(keyword.clone());
        }
        chosen.keywords.insert(keyword);

        if !added.is_empty() {
            debug!("Learned keywords {:?} for category {}", added, chosen.id);
        }
        added
    }
}

impl CategoryRuleEngine {
    /// Apply a manual recategorization and persist what was learned from it
    ///
    /// Returns the updated transaction and the keywords added to the chosen
    /// category.
    pub fn apply_correction(
        &self,
        db: &Database,
        transaction_id: Uuid,
        category_id: &str,
    ) -> Result<(Transaction, Vec<String>)> {
        let mut category = db
            .get_category(category_id)?
            .filter(|c| c.is_active)
            .ok_or_else(|| Error::NotFound(format!("Active category {}", category_id)))?;
        let mut transaction = db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;

        transaction.recategorize(&category.id);
        db.update_transaction(&transaction)?;

        // A later correction replaces whatever the merchant was taught before
        if let Some(keyword) = salient_merchant_keyword(&transaction.merchant) {
            db.remove_learned_keyword(&keyword, &category.id)?;
        }

        // The fallback category never takes part in matching
        let added = if category.id == UNCATEGORIZED {
            Vec::new()
        } else {
            self.update_category_rules(&transaction, &mut category)
        };
        if !added.is_empty() {
            db.persist_keyword_update(&category.id, &added)?;
        }

        info!(
            "Recategorized {} as {} (learned {} keyword(s))",
            transaction.id,
            category.id,
            added.len()
        );
        Ok((transaction, added))
    }
}

fn categorization(category: &Category, raw_score: f64) -> Categorization {
    Categorization {
        category_id: category.id.clone(),
        category_name: category.name.clone(),
        confidence: raw_score.clamp(0.0, 1.0),
    }
}

/// Uncapped keyword score; callers clamp for confidence
fn keyword_score(category: &Category, merchant: &str, text: &str) -> f64 {
    category
        .keywords
        .iter()
        .map(|keyword| {
            let keyword = keyword.to_lowercase();
            let len = keyword.chars().count();
            let mut score = 0.0;
            if contains_term(text, &keyword) {
                score += if len > 8 {
                    0.4
                } else if len > 5 {
                    0.3
                } else {
                    0.2
                };
            }
            if contains_term(merchant, &keyword) {
                score += 0.5;
                if len > 4 {
                    score += 0.3;
                }
            }
            score
        })
        .sum()
}

fn salary_score(category: &Category, amount: Decimal, text: &str) -> f64 {
    let mut score: f64 = category
        .keywords
        .iter()
        .filter(|k| contains_term(text, &k.to_lowercase()))
        .count() as f64
        * 0.3;

    score += if amount > Decimal::from(50_000) {
        0.4
    } else if amount > Decimal::from(20_000) {
        0.3
    } else if amount > Decimal::from(10_000) {
        0.2
    } else {
        0.0
    };

    if SALARY_CADENCE_TERMS.iter().any(|t| contains_term(text, t)) {
        score += 0.3;
    }
    score
}

/// The normalized merchant phrase worth remembering, if any
pub fn salient_merchant_keyword(merchant: &str) -> Option<String> {
    let normalized = normalize_merchant(merchant);
    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| !LEARNING_STOP_WORDS.contains(t))
        .collect();
    let phrase = tokens.join(" ");
    (phrase.chars().filter(|c| c.is_alphabetic()).count() >= 3).then_some(phrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Categorization, SyncState};
    use std::str::FromStr;
    use uuid::Uuid;

    fn candidate(direction: Direction, amount: &str, merchant: &str, body: &str) -> TransactionCandidate {
        TransactionCandidate {
            amount: Decimal::from_str(amount).unwrap(),
            direction,
            merchant_raw: merchant.to_string(),
            bank_hint: None,
            timestamp_ms: 0,
            source_message_id: String::new(),
            description: body.to_string(),
        }
    }

    fn transaction(merchant: &str) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            amount: Decimal::from(640),
            direction: Direction::Debit,
            merchant: merchant.to_string(),
            category_id: UNCATEGORIZED.to_string(),
            confidence: 0.0,
            timestamp_ms: 0,
            description: format!("Rs.640 debited from a/c XX1 to {}", merchant),
            bank_name: None,
            is_manually_categorized: false,
            sync_state: SyncState::Unsynced,
            last_sync_attempt_ms: None,
            source_message_id: None,
        }
    }

    #[test]
    fn test_merchant_match_assigns_category() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        let result = engine.categorize(
            &candidate(Direction::Debit, "450", "SWIGGY", "Rs.450 debited from a/c XX1 to SWIGGY"),
            &categories,
        );
        assert_eq!(result.category_id, "food");
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_more_specific_keyword_wins() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        let result = engine.categorize(
            &candidate(Direction::Debit, "1499", "AMAZON PRIME", "Rs.1499 paid to AMAZON PRIME"),
            &categories,
        );
        assert_eq!(result.category_id, "entertainment");

        let result = engine.categorize(
            &candidate(Direction::Debit, "2999", "AMAZON", "Rs.2999 paid to AMAZON"),
            &categories,
        );
        assert_eq!(result.category_id, "shopping");
    }

    #[test]
    fn test_no_match_falls_back_to_others() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        let result = engine.categorize(
            &candidate(Direction::Debit, "300", "RAMESH KUMAR", "Rs.300 debited to RAMESH KUMAR"),
            &categories,
        );
        assert_eq!(result.category_id, UNCATEGORIZED);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_weak_body_match_below_threshold() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        // "bus" is a short keyword found only in the body: 0.2 < 0.3
        let result = engine.categorize(
            &candidate(Direction::Debit, "60", "RAMESH KUMAR", "Rs.60 debited to RAMESH KUMAR bus"),
            &categories,
        );
        assert_eq!(result.category_id, UNCATEGORIZED);
    }

    #[test]
    fn test_salary_rule_for_large_credit() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        let result = engine.categorize(
            &candidate(
                Direction::Credit,
                "85000",
                "ACME CORP",
                "INR 85,000 credited to a/c XX1 from ACME CORP towards SALARY",
            ),
            &categories,
        );
        assert_eq!(result.category_id, SALARY_CATEGORY);
        assert!(result.confidence > SALARY_THRESHOLD);
    }

    #[test]
    fn test_salary_never_assigned_to_debits() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        let result = engine.categorize(
            &candidate(Direction::Debit, "5000", "ADVANCE SALARY", "Rs.5000 paid to ADVANCE SALARY"),
            &categories,
        );
        assert_ne!(result.category_id, SALARY_CATEGORY);
    }

    #[test]
    fn test_inactive_categories_skipped() {
        let engine = CategoryRuleEngine::default();
        let mut categories = default_categories();
        for c in categories.iter_mut().filter(|c| c.id == "food") {
            c.is_active = false;
        }
        let result = engine.categorize(
            &candidate(Direction::Debit, "450", "SWIGGY", "Rs.450 debited to SWIGGY"),
            &categories,
        );
        assert_eq!(result.category_id, UNCATEGORIZED);
    }

    #[test]
    fn test_categorize_is_idempotent() {
        let engine = CategoryRuleEngine::default();
        let categories = default_categories();
        let c = candidate(Direction::Debit, "320", "UBER", "Rs.320 debited to UBER trip");
        let first = engine.categorize(&c, &categories);
        let second = engine.categorize(&c, &categories);
        assert_eq!(first, second);
    }

    #[test]
    fn test_learning_routes_future_merchant() {
        let engine = CategoryRuleEngine::default();
        let mut categories = default_categories();

        let mut corrected = transaction("BIG BAZAAR");
        let before = engine.categorize_transaction(&corrected, &categories);
        assert_eq!(before.category_id, UNCATEGORIZED);

        corrected.recategorize("grocery");
        let grocery = categories.iter_mut().find(|c| c.id == "grocery").unwrap();
        let added = engine.update_category_rules(&corrected, grocery);
        assert_eq!(added, vec!["big bazaar".to_string()]);

        // Idempotent: nothing new the second time
        let grocery = categories.iter_mut().find(|c| c.id == "grocery").unwrap();
        assert!(engine.update_category_rules(&corrected, grocery).is_empty());
        assert_eq!(grocery.keywords.iter().filter(|k| *k == "big bazaar").count(), 1);

        let next = transaction("BIG BAZAAR 0042");
        let after = engine.categorize_transaction(&next, &categories);
        assert_eq!(after.category_id, "grocery");
        assert!(after.confidence >= engine.min_score());
    }

    #[test]
    fn test_learning_overrides_default_keyword() {
        let engine = CategoryRuleEngine::default();
        let mut categories = default_categories();

        let mut corrected = transaction("SWIGGY INSTAMART");
        corrected.recategorize("grocery");
        let grocery = categories.iter_mut().find(|c| c.id == "grocery").unwrap();
        engine.update_category_rules(&corrected, grocery);

        let result = engine.categorize_transaction(&transaction("SWIGGY INSTAMART"), &categories);
        assert_eq!(result.category_id, "grocery");
    }

    #[test]
    fn test_second_correction_replaces_first() {
        let db = Database::in_memory().unwrap();
        db.seed_default_categories().unwrap();
        let engine = CategoryRuleEngine::default();

        let corrected = transaction("BIG BAZAAR");
        db.insert_transaction(&corrected).unwrap();

        engine.apply_correction(&db, corrected.id, "grocery").unwrap();
        let (tx, learned) = engine.apply_correction(&db, corrected.id, "shopping").unwrap();
        assert_eq!(tx.category_id, "shopping");
        assert_eq!(learned, vec!["big bazaar".to_string()]);

        let grocery = db.get_category("grocery").unwrap().unwrap();
        assert!(!grocery.learned_keywords.contains("big bazaar"));
        assert!(!grocery.keywords.contains("big bazaar"));

        let categories = db.get_active_categories().unwrap();
        let next = engine.categorize_transaction(&transaction("BIG BAZAAR"), &categories);
        assert_eq!(next.category_id, "shopping");

        // Switching back works the same way
        engine.apply_correction(&db, corrected.id, "grocery").unwrap();
        let categories = db.get_active_categories().unwrap();
        let next = engine.categorize_transaction(&transaction("BIG BAZAAR"), &categories);
        assert_eq!(next.category_id, "grocery");
    }

    #[test]
    fn test_unknown_merchant_learns_nothing() {
        let engine = CategoryRuleEngine::default();
        let mut categories = default_categories();
        let food = categories.iter_mut().find(|c| c.id == "food").unwrap();
        assert!(engine.update_category_rules(&transaction("Unknown"), food).is_empty());
        assert!(salient_merchant_keyword("12 34").is_none());
    }

    #[test]
    fn test_uncategorized_helper() {
        assert_eq!(Categorization::uncategorized().category_id, UNCATEGORIZED);
    }
}

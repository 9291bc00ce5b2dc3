//! Financial message classification
//!
//! A message is treated as a transaction notification only when it carries
//! all three signals:
//!
//! 1. a transaction verb (`debited`, `spent`, `paid to`, ...)
//! 2. a currency marker (`rs.`, `inr`, `₹`, ...) or a payment rail (`upi`, `neft`, ...)
//! 3. a banking context term (`account`, `a/c`, `txn`, ...)
//!
//! The check is a plain boolean conjunction with no scoring, so the same text
//! always classifies the same way.

use crate::text::contains_term;

const TRANSACTION_VERBS: &[&str] = &[
    "debited",
    "credited",
    "debit",
    "credit",
    "spent",
    "received",
    "transferred",
    "withdrawn",
    "deposited",
    "paid to",
    "payment of",
];

const CURRENCY_MARKERS: &[&str] = &["rs.", "rs ", "inr", "₹", "rupees"];

const PAYMENT_RAILS: &[&str] = &["upi", "imps", "neft", "rtgs"];

const BANKING_CONTEXT: &[&str] = &["account", "a/c", "ac", "balance", "bal", "transaction", "txn"];

/// Decides whether a message body is a bank transaction notification
#[derive(Debug, Clone)]
pub struct MessageClassifier {
    verbs: Vec<String>,
    currency: Vec<String>,
    rails: Vec<String>,
    context: Vec<String>,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        let owned = |terms: &[&str]| terms.iter().map(|t| t.to_string()).collect();
        Self {
            verbs: owned(TRANSACTION_VERBS),
            currency: owned(CURRENCY_MARKERS),
            rails: owned(PAYMENT_RAILS),
            context: owned(BANKING_CONTEXT),
        }
    }
}

impl MessageClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the body has a verb, an amount or rail marker, and banking context
    pub fn classify(&self, body: &str) -> bool {
        let text = body.to_lowercase();
        let has_any = |terms: &[String]| terms.iter().any(|t| contains_term(&text, t));

        has_any(&self.verbs)
            && (has_any(&self.currency) || has_any(&self.rails))
            && has_any(&self.context)
    }
}

//! Transaction extraction from bank notification text
//!
//! Turns a message that already passed classification into a
//! [`TransactionCandidate`]: amount next to a currency marker, direction from
//! the earliest transaction verb, merchant from positional phrases like
//! "to AMAZON" or "at SWIGGY", and the issuing bank from the sender id.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::ExtractionError;
use crate::models::{Direction, RawMessage, TransactionCandidate, UNKNOWN_MERCHANT};
use crate::text::{collapse_whitespace, contains_term, contains_word};

const DEBIT_VERBS: &[&str] = &["debited", "debit", "spent", "paid", "withdrawn", "sent"];
const CREDIT_VERBS: &[&str] = &["credited", "credit", "received", "refund", "refunded", "deposited"];

/// Words that make a captured phrase useless as a merchant name
const GENERIC_MERCHANT_TERMS: &[&str] = &[
    "unknown",
    "merchant",
    "payment",
    "transaction",
    "transfer",
    "debit",
    "credit",
    "bank",
    "upi",
    "imps",
    "neft",
    "rtgs",
    "pos",
    "atm",
    "cash",
    "withdrawal",
    "deposit",
    "balance",
    "sms",
    "alert",
    "notification",
    "service",
    "charge",
    "fee",
    "account",
    "acct",
];

/// Known issuers: (display name, sender/body markers)
const KNOWN_BANKS: &[(&str, &[&str])] = &[
    ("SBI", &["SBIINB", "SBIPSG", "SBI"]),
    ("HDFC Bank", &["HDFCBK", "HDFC"]),
    ("ICICI Bank", &["ICICIB", "ICICI"]),
    ("Axis Bank", &["AXISBK", "AXIS"]),
    ("Kotak Mahindra", &["KOTAKB", "KOTAK"]),
    ("IPPB", &["IPPB"]),
    ("Paytm", &["PAYTM"]),
    ("PhonePe", &["PHONEPE"]),
    ("Google Pay", &["GPAY", "GOOGLE PAY"]),
    ("Bank of Baroda", &["BOBTXN", "BANK OF BARODA", "BARODA"]),
    ("PNB", &["PNBSMS", "PUNJAB NATIONAL", "PNB"]),
    ("Canara Bank", &["CANBNK", "CANARA"]),
    ("Union Bank", &["UNIONB", "UNION BANK"]),
    ("IDBI Bank", &["IDBIBK", "IDBI"]),
    ("Yes Bank", &["YESBNK", "YES BANK"]),
];

/// Parses classified message bodies into transaction candidates
#[derive(Debug, Clone)]
pub struct TransactionExtractor {
    amount_re: Regex,
    merchant_lead_re: Regex,
    merchant_body_re: Regex,
    account_mask_re: Regex,
    account_abbrev_re: Regex,
}

impl Default for TransactionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionExtractor {
    pub fn new() -> Self {
        Self {
            amount_re: Regex::new(
                r"(?i)(?:(?:\b(?:rs\.?|inr)|₹)\s*|\b(?:debited|credited)\s+(?:by|with)\s+(?:(?:rs\.?|inr)\s*)?)(\d+(?:,\d{2,3})*(?:\.\d{1,2})?)",
            )
            .expect("valid regex"),
            merchant_lead_re: Regex::new(
                r"(?i)\b(?:at|from|to|trf\s+to|transferred\s+to|towards)\s+",
            )
            .expect("valid regex"),
            merchant_body_re: Regex::new(
                r"(?i)^([a-z0-9][a-z0-9 &.\-]*?)(?:\s+(?:on|from|to|at|by|using|with|ref|refno|umn|thru|through|via|avl|bal)\b|\s*[.,;:/(]\s|\s*[,;:/(]|\.?\s*$)",
            )
            .expect("valid regex"),
            account_mask_re: Regex::new(r"(?i)^(?:x+|\*+)\d+$|^\d+$").expect("valid regex"),
            account_abbrev_re: Regex::new(r"(?i)\ba/c\b").expect("valid regex"),
        }
    }

    /// Extract a candidate from a message body alone
    ///
    /// The returned candidate has no timestamp or source id; use
    /// [`extract_message`](Self::extract_message) when the raw message is
    /// available.
    pub fn extract(&self, body: &str) -> Result<TransactionCandidate, ExtractionError> {
        let amount = self.extract_amount(body)?;
        let direction = detect_direction(body)?;
        let merchant_raw = self
            .extract_merchant(body)
            .unwrap_or_else(|| UNKNOWN_MERCHANT.to_string());

        Ok(TransactionCandidate {
            amount,
            direction,
            merchant_raw,
            bank_hint: detect_bank(body),
            timestamp_ms: 0,
            source_message_id: String::new(),
            description: body.trim().to_string(),
        })
    }

    /// Extract a candidate from a full inbox message, falling back to the sender as bank hint
    pub fn extract_message(
        &self,
        message: &RawMessage,
    ) -> Result<TransactionCandidate, ExtractionError> {
        let mut candidate = self.extract(&message.body)?;
        candidate.timestamp_ms = message.timestamp_ms;
        candidate.source_message_id = message.id.clone();
        candidate.bank_hint = detect_bank(&message.sender)
            .or(candidate.bank_hint)
            .or_else(|| sender_bank_hint(&message.sender));
        debug!(
            "Extracted {} {} from message {} (merchant: {})",
            candidate.direction, candidate.amount, message.id, candidate.merchant_raw
        );
        Ok(candidate)
    }

    fn extract_amount(&self, body: &str) -> Result<Decimal, ExtractionError> {
        self.amount_re
            .captures_iter(body)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| Decimal::from_str(&m.as_str().replace(',', "")).ok())
            .find(|amount| *amount > Decimal::ZERO)
            .ok_or(ExtractionError::NoAmountFound)
    }

    /// Find the first positional phrase that looks like a real merchant
    pub fn extract_merchant(&self, body: &str) -> Option<String> {
        // "a/c" would otherwise split a capture at the slash
        let body = self.account_abbrev_re.replace_all(body, "acct");
        self.merchant_lead_re.find_iter(&body).find_map(|lead| {
            let rest = &body[lead.end()..];
            let caps = self.merchant_body_re.captures(rest)?;
            let cleaned = clean_merchant(caps.get(1)?.as_str());
            self.is_valid_merchant(&cleaned).then_some(cleaned)
        })
    }

    /// Reject captures that are generic banking words, masks, or too short
    pub fn is_valid_merchant(&self, merchant: &str) -> bool {
        let trimmed = merchant.trim();
        if trimmed.chars().count() < 3 || !trimmed.chars().any(|c| c.is_alphabetic()) {
            return false;
        }
        if trimmed
            .split_whitespace()
            .any(|token| self.account_mask_re.is_match(token))
        {
            return false;
        }
        let lower = trimmed.to_lowercase();
        !GENERIC_MERCHANT_TERMS
            .iter()
            .any(|term| contains_word(&lower, term))
    }
}

fn clean_merchant(raw: &str) -> String {
    collapse_whitespace(raw)
        .trim_matches(|c: char| c == '.' || c == '-' || c == '&' || c.is_whitespace())
        .to_string()
}

/// Direction comes from whichever directional verb appears first
fn detect_direction(body: &str) -> Result<Direction, ExtractionError> {
    let lower = body.to_lowercase();
    let first_hit = |verbs: &[&str]| {
        verbs
            .iter()
            .filter_map(|verb| first_word_start(&lower, verb))
            .min()
    };

    match (first_hit(DEBIT_VERBS), first_hit(CREDIT_VERBS)) {
        (Some(d), Some(c)) if d < c => Ok(Direction::Debit),
        (Some(d), Some(c)) if c < d => Ok(Direction::Credit),
        (Some(_), None) => Ok(Direction::Debit),
        (None, Some(_)) => Ok(Direction::Credit),
        _ => Err(ExtractionError::AmbiguousDirection),
    }
}

fn first_word_start(haystack: &str, word: &str) -> Option<usize> {
    haystack.match_indices(word).map(|(idx, _)| idx).find(|&idx| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Match a known bank from a sender id or message body; markers must start
/// a word so `TAXIS` is not read as Axis
pub fn detect_bank(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    KNOWN_BANKS
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| contains_term(&upper, m)))
        .map(|(name, _)| name.to_string())
}

/// Strip the operator routing prefix from a sender id (`VM-HDFCBK` -> `HDFCBK`)
fn sender_bank_hint(sender: &str) -> Option<String> {
    let id = sender.rsplit('-').next().unwrap_or(sender).trim();
    if id.is_empty() || id.chars().all(|c| c.is_ascii_digit() || c == '+') {
        None
    } else {
        Some(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> TransactionExtractor {
        TransactionExtractor::new()
    }

    #[test]
    fn test_extract_debit_with_merchant() {
        let candidate = extractor()
            .extract("Rs.500 debited from A/c XX1234 to AMAZON on 01-01-25")
            .unwrap();
        assert_eq!(candidate.amount, Decimal::from(500));
        assert_eq!(candidate.direction, Direction::Debit);
        assert!(candidate.merchant_raw.contains("AMAZON"));
    }

    #[test]
    fn test_extract_amount_with_commas_and_decimals() {
        let candidate = extractor()
            .extract("INR 1,23,456.50 credited to your a/c XX9876 by NEFT from ACME CORP")
            .unwrap();
        assert_eq!(candidate.amount, Decimal::from_str("123456.50").unwrap());
        assert_eq!(candidate.direction, Direction::Credit);
        assert_eq!(candidate.merchant_raw, "ACME CORP");
    }

    #[test]
    fn test_extract_rupee_symbol_and_at_merchant() {
        let candidate = extractor()
            .extract("You have spent ₹249.00 at NETFLIX using card XX4321. Avl bal ₹5,000")
            .unwrap();
        assert_eq!(candidate.amount, Decimal::from_str("249.00").unwrap());
        assert_eq!(candidate.direction, Direction::Debit);
        assert_eq!(candidate.merchant_raw, "NETFLIX");
    }

    #[test]
    fn test_debited_by_amount() {
        let candidate = extractor()
            .extract("A/c XX1234 debited by 350.00 on 02Jan25 trf to ZOMATO Refno 5544")
            .unwrap();
        assert_eq!(candidate.amount, Decimal::from_str("350.00").unwrap());
        assert_eq!(candidate.merchant_raw, "ZOMATO");
    }

    #[test]
    fn test_no_amount_is_error() {
        let err = extractor()
            .extract("Your account was debited. Check the app for details")
            .unwrap_err();
        assert_eq!(err, ExtractionError::NoAmountFound);
    }

    #[test]
    fn test_zero_amount_is_error() {
        let err = extractor()
            .extract("Rs.0.00 debited from a/c XX1234")
            .unwrap_err();
        assert_eq!(err, ExtractionError::NoAmountFound);
    }

    #[test]
    fn test_no_direction_is_error() {
        let err = extractor()
            .extract("Rs.500 transaction on a/c XX1234 at AMAZON")
            .unwrap_err();
        assert_eq!(err, ExtractionError::AmbiguousDirection);
    }

    #[test]
    fn test_earliest_verb_wins() {
        let candidate = extractor()
            .extract("Rs.200 debited from a/c XX12 and credited to VPA shop@upi")
            .unwrap();
        assert_eq!(candidate.direction, Direction::Debit);
    }

    #[test]
    fn test_merchant_fallback_unknown() {
        let candidate = extractor()
            .extract("Rs.100 debited from your account XX1234")
            .unwrap();
        assert_eq!(candidate.merchant_raw, UNKNOWN_MERCHANT);
    }

    #[test]
    fn test_is_valid_merchant() {
        let ex = extractor();
        assert!(ex.is_valid_merchant("BIG BAZAAR"));
        assert!(!ex.is_valid_merchant("AB"));
        assert!(!ex.is_valid_merchant("12345"));
        assert!(!ex.is_valid_merchant("UPI payment"));
        assert!(!ex.is_valid_merchant("XX1234"));
        assert!(!ex.is_valid_merchant("your account XX1234"));
    }

    #[test]
    fn test_bank_from_sender() {
        let message = RawMessage {
            id: "42".to_string(),
            sender: "VM-HDFCBK".to_string(),
            body: "Rs.500 debited from a/c XX1234 to AMAZON".to_string(),
            timestamp_ms: 1_700_000_000_000,
        };
        let candidate = extractor().extract_message(&message).unwrap();
        assert_eq!(candidate.bank_hint.as_deref(), Some("HDFC Bank"));
        assert_eq!(candidate.timestamp_ms, 1_700_000_000_000);
        assert_eq!(candidate.source_message_id, "42");
    }

    #[test]
    fn test_unknown_sender_used_as_hint() {
        let message = RawMessage {
            id: "7".to_string(),
            sender: "AD-FEDBNK".to_string(),
            body: "Rs.500 debited from a/c XX1234 to AMAZON".to_string(),
            timestamp_ms: 0,
        };
        let candidate = extractor().extract_message(&message).unwrap();
        assert_eq!(candidate.bank_hint.as_deref(), Some("FEDBNK"));
    }

    #[test]
    fn test_bank_markers_match_at_word_start() {
        assert_eq!(detect_bank("Rs.250 spent at TAXIS CABS"), None);
        assert_eq!(detect_bank("Paid via PAYTMALL wallet").as_deref(), Some("Paytm"));
        assert_eq!(
            detect_bank("Rs.250 debited from Axis Bank a/c XX12").as_deref(),
            Some("Axis Bank")
        );
        assert_eq!(detect_bank("JD-SBIINB").as_deref(), Some("SBI"));
        assert_eq!(detect_bank("VM-HDFCBK").as_deref(), Some("HDFC Bank"));
    }

    #[test]
    fn test_merchant_name_does_not_set_bank() {
        let message = RawMessage {
            id: "8".to_string(),
            sender: "AD-FEDBNK".to_string(),
            body: "Rs.250 debited from a/c XX1234 to TAXIS CABS".to_string(),
            timestamp_ms: 0,
        };
        let candidate = extractor().extract_message(&message).unwrap();
        assert_eq!(candidate.bank_hint.as_deref(), Some("FEDBNK"));
    }
}

//! Text matching helpers shared by the classifier, extractor and rule engine

use std::sync::OnceLock;

use regex::Regex;

/// Check whether `term` occurs in `haystack` at the start of a word
///
/// Both inputs are expected to be lower-cased. Terms that begin with a
/// symbol (`₹`, `a/c`) only need a plain substring hit.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let needs_boundary = term.chars().next().is_some_and(|c| c.is_alphanumeric());
    if !needs_boundary {
        return haystack.contains(term);
    }
    haystack.match_indices(term).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |prev| !prev.is_alphanumeric())
    })
}

/// Check whether `word` occurs in `haystack` as a whole word
pub fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

fn noise_regex() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| {
        Regex::new(r"\b(?:upi|imps|neft|ref|txn|id|pos|card|debit|credit|payment|subscription)\b|\d+")
            .expect("valid regex")
    })
}

/// Normalize a merchant name for grouping
///
/// Lower-cases, drops rail/reference tokens and digits, replaces
/// punctuation with spaces and collapses whitespace.
pub fn normalize_merchant(merchant: &str) -> String {
    let lower = merchant.to_lowercase();
    let stripped = noise_regex().replace_all(&lower, " ");
    let cleaned: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c } else { ' ' })
        .collect();
    collapse_whitespace(&cleaned)
}

/// Trim and collapse runs of whitespace into single spaces
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

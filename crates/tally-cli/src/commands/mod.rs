//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared utilities (open_db, load_config) plus init and classify
//! - `ingest` - Inbox ingestion
//! - `transactions` - Transaction list/show and manual recategorization
//! - `categories` - Category management
//! - `recurring` - Recurring payment report
//! - `sync` - Upload to the sync backend
//! - `status` - Database and sync status

pub mod categories;
pub mod core;
pub mod ingest;
pub mod recurring;
pub mod status;
pub mod sync;
pub mod transactions;

// Re-export command functions for main.rs
pub use categories::*;
pub use core::*;
pub use ingest::*;
pub use recurring::*;
pub use status::*;
pub use sync::*;
pub use transactions::*;

use rust_decimal::Decimal;
use tally_core::models::Direction;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Colored amount: red for debits, green for credits
pub fn format_amount(amount: Decimal, direction: Direction) -> String {
    match direction {
        Direction::Debit => format!("\x1b[31m-₹{:.2}\x1b[0m", amount),
        Direction::Credit => format!("\x1b[32m+₹{:.2}\x1b[0m", amount),
    }
}

//! Processed-message ledger

use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::Database;
use crate::error::Result;
use crate::models::RawMessage;

/// What the ingestion pipeline did with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    NotFinancial,
    ParseFailed,
    Duplicate,
    Inserted,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFinancial => "not_financial",
            Self::ParseFailed => "parse_failed",
            Self::Duplicate => "duplicate",
            Self::Inserted => "inserted",
        }
    }
}

/// Content hash identifying a message across inbox exports
pub fn message_hash(message: &RawMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.sender.as_bytes());
    hasher.update(b"|");
    hasher.update(message.body.as_bytes());
    hasher.update(b"|");
    hasher.update(message.timestamp_ms.to_le_bytes());
    hex::encode(hasher.finalize())
}

impl Database {
    /// Whether a message with this hash was already handled
    pub fn is_message_processed(&self, hash: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_messages WHERE message_hash = ?",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record the pipeline outcome for a message
    pub fn record_processed_message(
        &self,
        hash: &str,
        message_id: &str,
        outcome: MessageOutcome,
        transaction_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO processed_messages (message_hash, message_id, outcome, transaction_id)
            VALUES (?, ?, ?, ?)
            "#,
            params![hash, message_id, outcome.as_str(), transaction_id],
        )?;
        Ok(())
    }
}

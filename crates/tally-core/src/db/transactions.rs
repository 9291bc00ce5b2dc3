//! Transaction operations

use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{conversion_error, Database};
use crate::error::{Error, Result};
use crate::models::{Direction, SyncState, Transaction};

const TRANSACTION_COLUMNS: &str = "id, amount, direction, merchant, category_id, confidence, \
     timestamp_ms, description, bank_name, is_manually_categorized, sync_state, \
     last_sync_attempt_ms, source_message_id";

/// Canonical text form of an amount, so equal values compare equal in SQL
pub(crate) fn amount_key(amount: Decimal) -> String {
    amount.normalize().to_string()
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let id: String = row.get(0)?;
    let amount: String = row.get(1)?;
    let direction: String = row.get(2)?;
    let sync_state: String = row.get(10)?;

    Ok(Transaction {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        amount: Decimal::from_str(&amount).map_err(|e| conversion_error(1, e))?,
        direction: Direction::from_str(&direction)
            .map_err(|e| conversion_error(2, Error::InvalidData(e)))?,
        merchant: row.get(3)?,
        category_id: row.get(4)?,
        confidence: row.get(5)?,
        timestamp_ms: row.get(6)?,
        description: row.get(7)?,
        bank_name: row.get(8)?,
        is_manually_categorized: row.get(9)?,
        sync_state: SyncState::from_str(&sync_state)
            .map_err(|e| conversion_error(10, Error::InvalidData(e)))?,
        last_sync_attempt_ms: row.get(11)?,
        source_message_id: row.get(12)?,
    })
}

impl Database {
    /// Insert a new transaction
    pub fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.amount <= Decimal::ZERO {
            return Err(Error::InvalidData(format!(
                "Refusing to store non-positive amount {}",
                tx.amount
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO transactions (id, amount, direction, merchant, category_id, confidence,
                timestamp_ms, description, bank_name, is_manually_categorized, sync_state,
                last_sync_attempt_ms, source_message_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                tx.id.to_string(),
                amount_key(tx.amount),
                tx.direction.as_str(),
                tx.merchant,
                tx.category_id,
                tx.confidence,
                tx.timestamp_ms,
                tx.description,
                tx.bank_name,
                tx.is_manually_categorized,
                tx.sync_state.as_str(),
                tx.last_sync_attempt_ms,
                tx.source_message_id,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the mutable fields of an existing transaction
    pub fn update_transaction(&self, tx: &Transaction) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE transactions
            SET merchant = ?, category_id = ?, confidence = ?, description = ?, bank_name = ?,
                is_manually_categorized = ?, sync_state = ?, last_sync_attempt_ms = ?
            WHERE id = ?
            "#,
            params![
                tx.merchant,
                tx.category_id,
                tx.confidence,
                tx.description,
                tx.bank_name,
                tx.is_manually_categorized,
                tx.sync_state.as_str(),
                tx.last_sync_attempt_ms,
                tx.id.to_string(),
            ],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("Transaction {}", tx.id)));
        }
        Ok(())
    }

    /// Get a transaction by id
    pub fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS),
                params![id.to_string()],
                row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// List the most recent transactions
    pub fn list_transactions(&self, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions ORDER BY timestamp_ms DESC, id LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit, offset], row_to_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Transactions still waiting to reach the backend, oldest first
    ///
    /// Includes `SyncFailed` rows: failures stay retryable.
    pub fn get_unsynced(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE sync_state IN ('unsynced', 'sync_failed') \
             ORDER BY timestamp_ms ASC, id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Mark transactions as synced, returning how many rows changed
    pub fn mark_synced(&self, ids: &[Uuid], at_ms: i64) -> Result<usize> {
        self.set_sync_state(ids, SyncState::Synced, at_ms)
    }

    /// Mark transactions as failed (still retryable)
    pub fn mark_sync_failed(&self, ids: &[Uuid], at_ms: i64) -> Result<usize> {
        self.set_sync_state(ids, SyncState::SyncFailed, at_ms)
    }

    fn set_sync_state(&self, ids: &[Uuid], state: SyncState, at_ms: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = db_tx.prepare(
                "UPDATE transactions SET sync_state = ?, last_sync_attempt_ms = ? WHERE id = ?",
            )?;
            for id in ids {
                changed += stmt.execute(params![state.as_str(), at_ms, id.to_string()])?;
            }
        }
        db_tx.commit()?;
        Ok(changed)
    }

    /// All transactions with `start_ms <= timestamp_ms < end_ms`, oldest first
    pub fn get_all_by_date_range(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE timestamp_ms >= ? AND timestamp_ms < ? \
             ORDER BY timestamp_ms ASC, id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![start_ms, end_ms], row_to_transaction)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Full history, oldest first
    pub fn get_all_transactions(&self) -> Result<Vec<Transaction>> {
        self.get_all_by_date_range(i64::MIN, i64::MAX)
    }

    /// Find a transaction with the same amount and merchant within `window_ms`
    pub fn find_near_duplicate(
        &self,
        amount: Decimal,
        merchant: &str,
        timestamp_ms: i64,
        window_ms: i64,
    ) -> Result<Option<Uuid>> {
        let conn = self.conn()?;
        let id: Option<String> = conn
            .query_row(
                r#"
                SELECT id FROM transactions
                WHERE amount = ? AND merchant = ? COLLATE NOCASE
                  AND timestamp_ms BETWEEN ? AND ?
                LIMIT 1
                "#,
                params![
                    amount_key(amount),
                    merchant,
                    timestamp_ms.saturating_sub(window_ms),
                    timestamp_ms.saturating_add(window_ms),
                ],
                |row| row.get(0),
            )
            .optional()?;

        id.map(|s| Uuid::parse_str(&s).map_err(Error::from))
            .transpose()
    }

    /// Count transactions per sync state: (unsynced, failed, synced)
    pub fn count_by_sync_state(&self) -> Result<(i64, i64, i64)> {
        let conn = self.conn()?;
        let count = |state: SyncState| -> Result<i64> {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE sync_state = ?",
                params![state.as_str()],
                |row| row.get(0),
            )?)
        };
        Ok((
            count(SyncState::Unsynced)?,
            count(SyncState::SyncFailed)?,
            count(SyncState::Synced)?,
        ))
    }

    /// Delete a transaction (explicit user action only)
    pub fn delete_transaction(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM transactions WHERE id = ?",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }
}

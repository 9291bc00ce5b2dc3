//! Sync run history

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{SyncResult, SyncRunStatus};

/// A recorded sync run
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub synced_count: i64,
    pub failed_count: i64,
    pub status: String,
}

impl Database {
    /// Open a sync run record, returning its id
    pub fn start_sync_run(&self) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO sync_runs (status) VALUES ('running')", [])?;
        Ok(conn.last_insert_rowid())
    }

    /// Close a sync run record with its result
    pub fn finish_sync_run(&self, run_id: i64, result: &SyncResult) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE sync_runs
            SET finished_at = CURRENT_TIMESTAMP, synced_count = ?, failed_count = ?, status = ?
            WHERE id = ?
            "#,
            params![
                result.synced_count as i64,
                result.failed_count as i64,
                result.status.as_str(),
                run_id
            ],
        )?;
        Ok(())
    }

    /// Finish time of the most recent run that completed
    pub fn last_successful_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let finished: Option<String> = conn
            .query_row(
                "SELECT finished_at FROM sync_runs WHERE status = ? AND finished_at IS NOT NULL \
                 ORDER BY id DESC LIMIT 1",
                params![SyncRunStatus::Completed.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(finished.map(|s| parse_datetime(&s)))
    }

    /// Most recent runs, newest first
    pub fn list_sync_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, synced_count, failed_count, status \
             FROM sync_runs ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let started: String = row.get(1)?;
            let finished: Option<String> = row.get(2)?;
            Ok(SyncRun {
                id: row.get(0)?,
                started_at: parse_datetime(&started),
                finished_at: finished.as_deref().map(parse_datetime),
                synced_count: row.get(3)?,
                failed_count: row.get(4)?,
                status: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

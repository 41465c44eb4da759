use super::engine::{now_rfc3339, StorageEngine};
use crate::error::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Pending delayed job. The id is canonical: re-enqueueing the same id
/// replaces the earlier timer (last-write-wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJobRecord {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub run_at: String,
    pub created_at: String,
}

impl StorageEngine {
    pub fn enqueue_job(&self, id: &str, kind: &str, payload: &str, run_at: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT OR REPLACE INTO scheduled_jobs (id, kind, payload, run_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, kind, payload, run_at, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn cancel_job(&self, id: &str) -> Result<bool> {
        let db = self.db.lock();
        let rows = db.execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Cancel every pending job whose id starts with the prefix. Used on
    /// acknowledgment/resolution to drop `escalation:{incident}:` timers.
    pub fn cancel_jobs_with_prefix(&self, prefix: &str) -> Result<usize> {
        let db = self.db.lock();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = db.execute(
            "DELETE FROM scheduled_jobs WHERE id LIKE ?1 ESCAPE '\\'",
            params![pattern],
        )?;
        Ok(rows)
    }

    /// Jobs whose run_at has passed. The poller handles each and then calls
    /// `complete_job`; a crash mid-handling leaves the row due, so delivery
    /// is at-least-once and fire handlers re-check state.
    pub fn due_jobs(&self, limit: u32) -> Result<Vec<ScheduledJobRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, kind, payload, run_at, created_at FROM scheduled_jobs \
             WHERE run_at <= ?1 ORDER BY run_at LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![now_rfc3339(), limit], |row| {
                Ok(ScheduledJobRecord {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    payload: row.get(2)?,
                    run_at: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Delete a handled job. The run_at guard keeps a timer that was
    /// re-scheduled while the handler ran.
    pub fn complete_job(&self, id: &str, run_at_seen: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "DELETE FROM scheduled_jobs WHERE id = ?1 AND run_at = ?2",
            params![id, run_at_seen],
        )?;
        Ok(())
    }

    pub fn pending_jobs_with_prefix(&self, prefix: &str) -> Result<Vec<ScheduledJobRecord>> {
        let db = self.db.lock();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = db.prepare(
            "SELECT id, kind, payload, run_at, created_at FROM scheduled_jobs \
             WHERE id LIKE ?1 ESCAPE '\\' ORDER BY run_at",
        )?;
        let rows = stmt
            .query_map(params![pattern], |row| {
                Ok(ScheduledJobRecord {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    payload: row.get(2)?,
                    run_at: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

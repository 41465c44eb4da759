use super::engine::{now_rfc3339, StorageEngine};
use crate::error::{ApiError, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Runbook row with the approval state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub webhook_url: String,
    pub http_method: String,
    pub headers: String,
    pub auth: String,
    pub parameter_schema: String,
    pub payload_template: String,
    pub timeout_secs: i64,
    pub team_id: Option<String>,
    pub version: i64,
    pub approval_status: String,
    pub approved_by: Option<String>,
    pub approved_at: Option<String>,
    pub deprecation_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable definition snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookVersionRecord {
    pub runbook_id: String,
    pub version: i64,
    pub definition: String,
    pub change_note: String,
    pub changed_by: Option<String>,
    pub created_at: String,
}

/// One runbook invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookExecutionRecord {
    pub id: String,
    pub runbook_id: String,
    pub incident_id: Option<String>,
    pub parameters: String,
    pub triggered_by: String,
    pub status: String,
    pub status_code: Option<i64>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub created_at: String,
}

fn row_to_runbook(row: &Row) -> rusqlite::Result<RunbookRecord> {
    Ok(RunbookRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        webhook_url: row.get(3)?,
        http_method: row.get(4)?,
        headers: row.get(5)?,
        auth: row.get(6)?,
        parameter_schema: row.get(7)?,
        payload_template: row.get(8)?,
        timeout_secs: row.get(9)?,
        team_id: row.get(10)?,
        version: row.get(11)?,
        approval_status: row.get(12)?,
        approved_by: row.get(13)?,
        approved_at: row.get(14)?,
        deprecation_reason: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn row_to_runbook_execution(row: &Row) -> rusqlite::Result<RunbookExecutionRecord> {
    Ok(RunbookExecutionRecord {
        id: row.get(0)?,
        runbook_id: row.get(1)?,
        incident_id: row.get(2)?,
        parameters: row.get(3)?,
        triggered_by: row.get(4)?,
        status: row.get(5)?,
        status_code: row.get(6)?,
        response_body: row.get(7)?,
        error: row.get(8)?,
        duration_ms: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

const RUNBOOK_COLUMNS: &str = "id, name, description, webhook_url, http_method, headers, auth, \
     parameter_schema, payload_template, timeout_secs, team_id, version, approval_status, \
     approved_by, approved_at, deprecation_reason, created_at, updated_at";

const RUNBOOK_EXECUTION_COLUMNS: &str = "id, runbook_id, incident_id, parameters, triggered_by, \
     status, status_code, response_body, error, duration_ms, started_at, finished_at, created_at";

/// Definition snapshot stored in `runbook_versions`
fn definition_snapshot(rec: &RunbookRecord) -> String {
    json!({
        "name": rec.name,
        "description": rec.description,
        "webhook_url": rec.webhook_url,
        "http_method": rec.http_method,
        "headers": serde_json::from_str::<serde_json::Value>(&rec.headers)
            .unwrap_or_else(|_| json!({})),
        "auth": serde_json::from_str::<serde_json::Value>(&rec.auth)
            .unwrap_or_else(|_| json!({"type": "none"})),
        "parameter_schema": serde_json::from_str::<serde_json::Value>(&rec.parameter_schema)
            .unwrap_or_else(|_| json!({})),
        "payload_template": serde_json::from_str::<serde_json::Value>(&rec.payload_template)
            .unwrap_or_else(|_| json!({})),
        "timeout_secs": rec.timeout_secs,
    })
    .to_string()
}

impl StorageEngine {
    pub fn create_runbook(&self, rec: &RunbookRecord, changed_by: Option<&str>) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO runbooks (id, name, description, webhook_url, http_method, headers, \
             auth, parameter_schema, payload_template, timeout_secs, team_id, version, \
             approval_status, approved_by, approved_at, deprecation_reason, created_at, \
             updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
             ?17, ?18)",
            params![
                rec.id,
                rec.name,
                rec.description,
                rec.webhook_url,
                rec.http_method,
                rec.headers,
                rec.auth,
                rec.parameter_schema,
                rec.payload_template,
                rec.timeout_secs,
                rec.team_id,
                rec.version,
                rec.approval_status,
                rec.approved_by,
                rec.approved_at,
                rec.deprecation_reason,
                rec.created_at,
                rec.updated_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO runbook_versions (runbook_id, version, definition, change_note, \
             changed_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rec.id,
                rec.version,
                definition_snapshot(rec),
                "created",
                changed_by,
                rec.created_at
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_runbook(&self, id: &str) -> Result<RunbookRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!("SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE id = ?1"),
            params![id],
            row_to_runbook,
        )
        .map_err(|_| ApiError::NotFound("runbook".into(), id.into()))
    }

    pub fn list_runbooks(&self, team_id: Option<&str>) -> Result<Vec<RunbookRecord>> {
        let db = self.db.lock();
        let mut stmt;
        let rows = if let Some(team) = team_id {
            stmt = db.prepare(&format!(
                "SELECT {RUNBOOK_COLUMNS} FROM runbooks \
                 WHERE team_id = ?1 OR team_id IS NULL ORDER BY name"
            ))?;
            stmt.query_map(params![team], row_to_runbook)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt = db.prepare(&format!("SELECT {RUNBOOK_COLUMNS} FROM runbooks ORDER BY name"))?;
            stmt.query_map([], row_to_runbook)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(rows)
    }

    /// Apply a definition edit. Bumps the version and snapshots it; when the
    /// runbook was APPROVED the same transaction demotes it to DRAFT and
    /// clears the approval metadata.
    pub fn update_runbook_definition(
        &self,
        updated: &RunbookRecord,
        change_note: &str,
        changed_by: Option<&str>,
    ) -> Result<RunbookRecord> {
        let now = now_rfc3339();
        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let before = tx
            .query_row(
                &format!("SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE id = ?1"),
                params![updated.id],
                row_to_runbook,
            )
            .map_err(|_| ApiError::NotFound("runbook".into(), updated.id.clone()))?;

        let was_approved = before.approval_status == "APPROVED";
        let new_version = before.version + 1;
        let note = if was_approved {
            format!("{change_note}; reverted from APPROVED to DRAFT")
        } else {
            change_note.to_string()
        };

        let mut after = updated.clone();
        after.version = new_version;
        after.approval_status = "DRAFT".to_string();
        after.approved_by = None;
        after.approved_at = None;
        after.updated_at = now.clone();

        tx.execute(
            "UPDATE runbooks SET name = ?2, description = ?3, webhook_url = ?4, \
             http_method = ?5, headers = ?6, auth = ?7, parameter_schema = ?8, \
             payload_template = ?9, timeout_secs = ?10, version = ?11, \
             approval_status = 'DRAFT', approved_by = NULL, approved_at = NULL, \
             updated_at = ?12 WHERE id = ?1",
            params![
                after.id,
                after.name,
                after.description,
                after.webhook_url,
                after.http_method,
                after.headers,
                after.auth,
                after.parameter_schema,
                after.payload_template,
                after.timeout_secs,
                after.version,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO runbook_versions (runbook_id, version, definition, change_note, \
             changed_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![after.id, new_version, definition_snapshot(&after), note, changed_by, now],
        )?;
        tx.commit()?;
        Ok(after)
    }

    /// DRAFT → APPROVED. Bumps the version and snapshots with the approver.
    pub fn approve_runbook(&self, id: &str, approver: &str) -> Result<RunbookRecord> {
        let now = now_rfc3339();
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let mut rec = tx
            .query_row(
                &format!("SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE id = ?1"),
                params![id],
                row_to_runbook,
            )
            .map_err(|_| ApiError::NotFound("runbook".into(), id.into()))?;

        if rec.approval_status != "DRAFT" {
            return Err(ApiError::InvalidRequest(format!(
                "runbook is {}, only DRAFT runbooks can be approved",
                rec.approval_status
            )));
        }

        rec.version += 1;
        rec.approval_status = "APPROVED".to_string();
        rec.approved_by = Some(approver.to_string());
        rec.approved_at = Some(now.clone());
        rec.updated_at = now.clone();

        tx.execute(
            "UPDATE runbooks SET version = ?2, approval_status = 'APPROVED', approved_by = ?3, \
             approved_at = ?4, updated_at = ?4 WHERE id = ?1",
            params![id, rec.version, approver, now],
        )?;
        tx.execute(
            "INSERT INTO runbook_versions (runbook_id, version, definition, change_note, \
             changed_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, rec.version, definition_snapshot(&rec), "approved", approver, now],
        )?;
        tx.commit()?;
        Ok(rec)
    }

    /// APPROVED → DEPRECATED with a reason.
    pub fn deprecate_runbook(&self, id: &str, actor: &str, reason: &str) -> Result<RunbookRecord> {
        let now = now_rfc3339();
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let mut rec = tx
            .query_row(
                &format!("SELECT {RUNBOOK_COLUMNS} FROM runbooks WHERE id = ?1"),
                params![id],
                row_to_runbook,
            )
            .map_err(|_| ApiError::NotFound("runbook".into(), id.into()))?;

        if rec.approval_status != "APPROVED" {
            return Err(ApiError::InvalidRequest(format!(
                "runbook is {}, only APPROVED runbooks can be deprecated",
                rec.approval_status
            )));
        }

        rec.version += 1;
        rec.approval_status = "DEPRECATED".to_string();
        rec.deprecation_reason = Some(reason.to_string());
        rec.updated_at = now.clone();

        tx.execute(
            "UPDATE runbooks SET version = ?2, approval_status = 'DEPRECATED', \
             deprecation_reason = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, rec.version, reason, now],
        )?;
        tx.execute(
            "INSERT INTO runbook_versions (runbook_id, version, definition, change_note, \
             changed_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                rec.version,
                definition_snapshot(&rec),
                format!("deprecated: {reason}"),
                actor,
                now
            ],
        )?;
        tx.commit()?;
        Ok(rec)
    }

    pub fn list_runbook_versions(&self, id: &str) -> Result<Vec<RunbookVersionRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT runbook_id, version, definition, change_note, changed_by, created_at \
             FROM runbook_versions WHERE runbook_id = ?1 ORDER BY version DESC",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(RunbookVersionRecord {
                    runbook_id: row.get(0)?,
                    version: row.get(1)?,
                    definition: row.get(2)?,
                    change_note: row.get(3)?,
                    changed_by: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_runbook_version(&self, id: &str, version: i64) -> Result<RunbookVersionRecord> {
        let db = self.db.lock();
        db.query_row(
            "SELECT runbook_id, version, definition, change_note, changed_by, created_at \
             FROM runbook_versions WHERE runbook_id = ?1 AND version = ?2",
            params![id, version],
            |row| {
                Ok(RunbookVersionRecord {
                    runbook_id: row.get(0)?,
                    version: row.get(1)?,
                    definition: row.get(2)?,
                    change_note: row.get(3)?,
                    changed_by: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .map_err(|_| ApiError::NotFound("runbook version".into(), format!("{id}@{version}")))
    }

    /// Delete is forbidden while any execution is RUNNING.
    pub fn delete_runbook(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let running: i64 = tx.query_row(
            "SELECT COUNT(*) FROM runbook_executions WHERE runbook_id = ?1 AND status = 'RUNNING'",
            params![id],
            |row| row.get(0),
        )?;
        if running > 0 {
            return Err(ApiError::RunbookActiveExecution(id.into()));
        }
        let rows = tx.execute("DELETE FROM runbooks WHERE id = ?1", params![id])?;
        tx.commit()?;
        if rows == 0 {
            return Err(ApiError::NotFound("runbook".into(), id.into()));
        }
        Ok(())
    }

    // ==================== Executions ====================

    pub fn create_runbook_execution(&self, rec: &RunbookExecutionRecord) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO runbook_executions (id, runbook_id, incident_id, parameters, \
             triggered_by, status, status_code, response_body, error, duration_ms, started_at, \
             finished_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                rec.id,
                rec.runbook_id,
                rec.incident_id,
                rec.parameters,
                rec.triggered_by,
                rec.status,
                rec.status_code,
                rec.response_body,
                rec.error,
                rec.duration_ms,
                rec.started_at,
                rec.finished_at,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn finalize_runbook_execution(
        &self,
        id: &str,
        status: &str,
        status_code: Option<i64>,
        response_body: Option<&str>,
        error: Option<&str>,
        duration_ms: i64,
    ) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE runbook_executions SET status = ?2, status_code = ?3, response_body = ?4, \
             error = ?5, duration_ms = ?6, finished_at = ?7 WHERE id = ?1",
            params![id, status, status_code, response_body, error, duration_ms, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn mark_runbook_execution_running(&self, id: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE runbook_executions SET status = 'RUNNING', started_at = ?2 WHERE id = ?1",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_runbook_executions(
        &self,
        runbook_id: &str,
        limit: u32,
    ) -> Result<Vec<RunbookExecutionRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {RUNBOOK_EXECUTION_COLUMNS} FROM runbook_executions WHERE runbook_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![runbook_id, limit], row_to_runbook_execution)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

use super::engine::{now_rfc3339, StorageEngine};
use crate::error::{ApiError, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

/// Workflow row. `definition` is the JSON DAG; `version` counts every
/// definition change, each snapshotted into `workflow_versions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scope: String,
    pub team_id: Option<String>,
    pub version: i64,
    pub enabled: bool,
    pub definition: String,
    pub is_template: bool,
    pub template_category: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Immutable definition snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersionRecord {
    pub workflow_id: String,
    pub version: i64,
    pub definition: String,
    pub change_note: String,
    pub changed_by: Option<String>,
    pub created_at: String,
}

/// Persisted execution state. `completed_nodes` is append-only and updated
/// after every node so a crash leaves an inspectable RUNNING row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub incident_id: Option<String>,
    pub definition: String,
    pub status: String,
    pub current_node_id: Option<String>,
    pub completed_nodes: String,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub failed_at: Option<String>,
    pub created_at: String,
}

fn row_to_workflow(row: &Row) -> rusqlite::Result<WorkflowRecord> {
    Ok(WorkflowRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        scope: row.get(3)?,
        team_id: row.get(4)?,
        version: row.get(5)?,
        enabled: row.get::<_, i64>(6)? != 0,
        definition: row.get(7)?,
        is_template: row.get::<_, i64>(8)? != 0,
        template_category: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_execution(row: &Row) -> rusqlite::Result<WorkflowExecutionRecord> {
    Ok(WorkflowExecutionRecord {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        incident_id: row.get(2)?,
        definition: row.get(3)?,
        status: row.get(4)?,
        current_node_id: row.get(5)?,
        completed_nodes: row.get(6)?,
        error: row.get(7)?,
        started_at: row.get(8)?,
        completed_at: row.get(9)?,
        failed_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

const WORKFLOW_COLUMNS: &str = "id, name, description, scope, team_id, version, enabled, \
     definition, is_template, template_category, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, workflow_id, incident_id, definition, status, \
     current_node_id, completed_nodes, error, started_at, completed_at, failed_at, created_at";

impl StorageEngine {
    /// Insert the workflow and its version-1 snapshot together.
    pub fn create_workflow(&self, rec: &WorkflowRecord, changed_by: Option<&str>) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO workflows (id, name, description, scope, team_id, version, enabled, \
             definition, is_template, template_category, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                rec.id,
                rec.name,
                rec.description,
                rec.scope,
                rec.team_id,
                rec.version,
                rec.enabled as i64,
                rec.definition,
                rec.is_template as i64,
                rec.template_category,
                rec.created_at,
                rec.updated_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO workflow_versions (workflow_id, version, definition, change_note, \
             changed_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![rec.id, rec.version, rec.definition, "created", changed_by, rec.created_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_workflow(&self, id: &str) -> Result<WorkflowRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1"),
            params![id],
            row_to_workflow,
        )
        .map_err(|_| ApiError::NotFound("workflow".into(), id.into()))
    }

    pub fn list_workflows(&self, include_disabled: bool) -> Result<Vec<WorkflowRecord>> {
        let db = self.db.lock();
        let query = if include_disabled {
            format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE is_template = 0 ORDER BY name")
        } else {
            format!(
                "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                 WHERE is_template = 0 AND enabled = 1 ORDER BY name"
            )
        };
        let mut stmt = db.prepare(&query)?;
        let rows = stmt
            .query_map([], row_to_workflow)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_workflow_templates(&self, category: Option<&str>) -> Result<Vec<WorkflowRecord>> {
        let db = self.db.lock();
        let mut stmt;
        let rows = if let Some(cat) = category {
            stmt = db.prepare(&format!(
                "SELECT {WORKFLOW_COLUMNS} FROM workflows \
                 WHERE is_template = 1 AND template_category = ?1 ORDER BY name"
            ))?;
            stmt.query_map(params![cat], row_to_workflow)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt = db.prepare(&format!(
                "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE is_template = 1 ORDER BY name"
            ))?;
            stmt.query_map([], row_to_workflow)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(rows)
    }

    /// Bump the version, rewrite mutable fields and snapshot the new
    /// definition in one transaction. Returns the new version number.
    pub fn update_workflow_definition(
        &self,
        id: &str,
        name: &str,
        description: &str,
        definition: &str,
        change_note: &str,
        changed_by: Option<&str>,
    ) -> Result<i64> {
        let now = now_rfc3339();
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let version: i64 = tx
            .query_row(
                "SELECT version FROM workflows WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|_| ApiError::NotFound("workflow".into(), id.into()))?;
        let new_version = version + 1;
        tx.execute(
            "UPDATE workflows SET name = ?2, description = ?3, definition = ?4, version = ?5, \
             updated_at = ?6 WHERE id = ?1",
            params![id, name, description, definition, new_version, now],
        )?;
        tx.execute(
            "INSERT INTO workflow_versions (workflow_id, version, definition, change_note, \
             changed_by, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, new_version, definition, change_note, changed_by, now],
        )?;
        tx.commit()?;
        Ok(new_version)
    }

    pub fn set_workflow_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE workflows SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, enabled as i64, now_rfc3339()],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound("workflow".into(), id.into()));
        }
        Ok(())
    }

    pub fn delete_workflow(&self, id: &str) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute("DELETE FROM workflows WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(ApiError::NotFound("workflow".into(), id.into()));
        }
        Ok(())
    }

    pub fn list_workflow_versions(&self, id: &str) -> Result<Vec<WorkflowVersionRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT workflow_id, version, definition, change_note, changed_by, created_at \
             FROM workflow_versions WHERE workflow_id = ?1 ORDER BY version DESC",
        )?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(WorkflowVersionRecord {
                    workflow_id: row.get(0)?,
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

    pub fn get_workflow_version(&self, id: &str, version: i64) -> Result<WorkflowVersionRecord> {
        let db = self.db.lock();
        db.query_row(
            "SELECT workflow_id, version, definition, change_note, changed_by, created_at \
             FROM workflow_versions WHERE workflow_id = ?1 AND version = ?2",
            params![id, version],
            |row| {
                Ok(WorkflowVersionRecord {
                    workflow_id: row.get(0)?,
                    version: row.get(1)?,
                    definition: row.get(2)?,
                    change_note: row.get(3)?,
                    changed_by: row.get(4)?,
                    created_at: row.get(5)?,
                })
            },
        )
        .map_err(|_| ApiError::NotFound("workflow version".into(), format!("{id}@{version}")))
    }

    // ==================== Executions ====================

    pub fn create_workflow_execution(&self, rec: &WorkflowExecutionRecord) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO workflow_executions (id, workflow_id, incident_id, definition, status, \
             current_node_id, completed_nodes, error, started_at, completed_at, failed_at, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                rec.id,
                rec.workflow_id,
                rec.incident_id,
                rec.definition,
                rec.status,
                rec.current_node_id,
                rec.completed_nodes,
                rec.error,
                rec.started_at,
                rec.completed_at,
                rec.failed_at,
                rec.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_workflow_execution(&self, id: &str) -> Result<WorkflowExecutionRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = ?1"),
            params![id],
            row_to_execution,
        )
        .map_err(|_| ApiError::NotFound("workflow execution".into(), id.into()))
    }

    pub fn mark_execution_started(&self, id: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE workflow_executions SET status = 'RUNNING', started_at = ?2 WHERE id = ?1",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist progress after each node: the cursor and the appended results.
    pub fn update_execution_progress(
        &self,
        id: &str,
        current_node_id: &str,
        completed_nodes: &str,
    ) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE workflow_executions SET current_node_id = ?2, completed_nodes = ?3 \
             WHERE id = ?1",
            params![id, current_node_id, completed_nodes],
        )?;
        Ok(())
    }

    pub fn finalize_execution(
        &self,
        id: &str,
        status: &str,
        error: Option<&str>,
        completed_nodes: &str,
    ) -> Result<()> {
        let now = now_rfc3339();
        let (completed_at, failed_at) = match status {
            "COMPLETED" => (Some(now.clone()), None),
            "FAILED" | "CANCELLED" => (None, Some(now.clone())),
            _ => (None, None),
        };
        let db = self.db.lock();
        db.execute(
            "UPDATE workflow_executions SET status = ?2, error = ?3, completed_nodes = ?4, \
             completed_at = ?5, failed_at = ?6 WHERE id = ?1",
            params![id, status, error, completed_nodes, completed_at, failed_at],
        )?;
        Ok(())
    }

    /// Whether any execution of this workflow already exists for the
    /// incident. Keeps age triggers from firing repeatedly.
    pub fn has_execution_for(&self, workflow_id: &str, incident_id: &str) -> Result<bool> {
        let db = self.db.lock();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM workflow_executions \
             WHERE workflow_id = ?1 AND incident_id = ?2",
            params![workflow_id, incident_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_workflow_executions(
        &self,
        workflow_id: &str,
        limit: u32,
    ) -> Result<Vec<WorkflowExecutionRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE workflow_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![workflow_id, limit], row_to_execution)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

use super::alerts::AlertRecord;
use super::engine::{now_rfc3339, StorageEngine};
use crate::error::{ApiError, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Incident row. OPEN incidents group alerts by fingerprint inside the
/// integration's dedup window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub fingerprint: String,
    pub title: String,
    pub severity: String,
    pub status: String,
    pub team_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub current_level: i64,
    pub escalation_policy_id: Option<String>,
    pub alert_count: i64,
    pub status_history: String,
    pub created_at: String,
    pub updated_at: String,
    pub acknowledged_at: Option<String>,
    pub resolved_at: Option<String>,
}

fn row_to_incident(row: &Row) -> rusqlite::Result<IncidentRecord> {
    Ok(IncidentRecord {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        title: row.get(2)?,
        severity: row.get(3)?,
        status: row.get(4)?,
        team_id: row.get(5)?,
        assigned_user_id: row.get(6)?,
        current_level: row.get(7)?,
        escalation_policy_id: row.get(8)?,
        alert_count: row.get(9)?,
        status_history: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        acknowledged_at: row.get(13)?,
        resolved_at: row.get(14)?,
    })
}

const INCIDENT_COLUMNS: &str = "id, fingerprint, title, severity, status, team_id, \
     assigned_user_id, current_level, escalation_policy_id, alert_count, status_history, \
     created_at, updated_at, acknowledged_at, resolved_at";

fn append_history(history: &str, status: &str, actor: Option<&str>, at: &str) -> String {
    let mut entries: Vec<serde_json::Value> = serde_json::from_str(history).unwrap_or_default();
    entries.push(json!({ "status": status, "at": at, "by": actor }));
    serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
}

impl StorageEngine {
    /// Group the alert into an existing OPEN incident with the same
    /// fingerprint inside the window, or create a fresh incident.
    ///
    /// The existence check, incident insert/update and alert insert run in
    /// one transaction under the connection lock, so two concurrent
    /// deliveries with the same fingerprint cannot create two incidents.
    /// Returns the incident and whether the alert was grouped into it.
    pub fn group_or_create_incident(
        &self,
        alert: &mut AlertRecord,
        fingerprint: &str,
        team_id: Option<&str>,
        escalation_policy_id: Option<&str>,
        window_minutes: i64,
    ) -> Result<(IncidentRecord, bool)> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::minutes(window_minutes)).to_rfc3339();
        let now = now_rfc3339();

        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents \
                     WHERE fingerprint = ?1 AND status = 'OPEN' \
                       AND team_id IS ?2 AND created_at >= ?3 \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![fingerprint, team_id, cutoff],
                row_to_incident,
            )
            .optional()?;

        let (incident, grouped) = match existing {
            Some(mut incident) => {
                tx.execute(
                    "UPDATE incidents SET alert_count = alert_count + 1, updated_at = ?2 \
                     WHERE id = ?1",
                    params![incident.id, now],
                )?;
                incident.alert_count += 1;
                incident.updated_at = now.clone();
                (incident, true)
            }
            None => {
                let incident = IncidentRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    fingerprint: fingerprint.to_string(),
                    title: alert.title.clone(),
                    severity: alert.severity.clone(),
                    status: "OPEN".to_string(),
                    team_id: team_id.map(|s| s.to_string()),
                    assigned_user_id: None,
                    current_level: 0,
                    escalation_policy_id: escalation_policy_id.map(|s| s.to_string()),
                    alert_count: 1,
                    status_history: append_history("[]", "OPEN", None, &now),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                    acknowledged_at: None,
                    resolved_at: None,
                };
                tx.execute(
                    "INSERT INTO incidents (id, fingerprint, title, severity, status, team_id, \
                     assigned_user_id, current_level, escalation_policy_id, alert_count, \
                     status_history, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        incident.id,
                        incident.fingerprint,
                        incident.title,
                        incident.severity,
                        incident.status,
                        incident.team_id,
                        incident.assigned_user_id,
                        incident.current_level,
                        incident.escalation_policy_id,
                        incident.alert_count,
                        incident.status_history,
                        incident.created_at,
                        incident.updated_at,
                    ],
                )?;
                (incident, false)
            }
        };

        alert.incident_id = Some(incident.id.clone());
        tx.execute(
            "INSERT INTO alerts (id, title, description, severity, status, source, external_id, \
             triggered_at, metadata, integration_id, incident_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                alert.id,
                alert.title,
                alert.description,
                alert.severity,
                alert.status,
                alert.source,
                alert.external_id,
                alert.triggered_at,
                alert.metadata,
                alert.integration_id,
                alert.incident_id,
                alert.created_at,
            ],
        )?;

        tx.commit()?;
        Ok((incident, grouped))
    }

    pub fn get_incident(&self, id: &str) -> Result<IncidentRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
            params![id],
            row_to_incident,
        )
        .map_err(|_| ApiError::NotFound("incident".into(), id.into()))
    }

    pub fn list_incidents(&self, status: Option<&str>, limit: u32) -> Result<Vec<IncidentRecord>> {
        let db = self.db.lock();
        let mut query = format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(s) = status {
            query.push_str(" AND status = ?");
            args.push(Box::new(s.to_string()));
        }
        query.push_str(" ORDER BY created_at DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = db.prepare(&query)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_refs), row_to_incident)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Transition the incident, appending to its status history. Returns the
    /// prior status alongside the updated record.
    pub fn transition_incident(
        &self,
        id: &str,
        new_status: &str,
        actor: Option<&str>,
    ) -> Result<(IncidentRecord, String)> {
        let now = now_rfc3339();
        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let before = tx
            .query_row(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
                params![id],
                row_to_incident,
            )
            .map_err(|_| ApiError::NotFound("incident".into(), id.into()))?;

        let history = append_history(&before.status_history, new_status, actor, &now);
        let acknowledged_at = match new_status {
            "ACKNOWLEDGED" => Some(now.clone()),
            _ => before.acknowledged_at.clone(),
        };
        let resolved_at = match new_status {
            "RESOLVED" | "CLOSED" => Some(now.clone()),
            _ => before.resolved_at.clone(),
        };

        tx.execute(
            "UPDATE incidents SET status = ?2, status_history = ?3, updated_at = ?4, \
             acknowledged_at = ?5, resolved_at = ?6 WHERE id = ?1",
            params![id, new_status, history, now, acknowledged_at, resolved_at],
        )?;
        tx.commit()?;

        let mut after = before.clone();
        let old_status = before.status;
        after.status = new_status.to_string();
        after.status_history = history;
        after.updated_at = now;
        after.acknowledged_at = acknowledged_at;
        after.resolved_at = resolved_at;
        Ok((after, old_status))
    }

    /// Advance the escalation level. A no-op when the incident already sits
    /// at or past the target level, which makes duplicate job fires harmless.
    pub fn advance_incident_level(&self, id: &str, to_level: i64) -> Result<bool> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE incidents SET current_level = ?2, updated_at = ?3 \
             WHERE id = ?1 AND status = 'OPEN' AND current_level < ?2",
            params![id, to_level, now_rfc3339()],
        )?;
        Ok(rows > 0)
    }

    /// Reset the level for a repeat cycle restart.
    pub fn reset_incident_level(&self, id: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE incidents SET current_level = 0, updated_at = ?2 \
             WHERE id = ?1 AND status = 'OPEN'",
            params![id, now_rfc3339()],
        )?;
        Ok(())
    }

    pub fn assign_incident(&self, id: &str, user_id: Option<&str>) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE incidents SET assigned_user_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, user_id, now_rfc3339()],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound("incident".into(), id.into()));
        }
        Ok(())
    }
}

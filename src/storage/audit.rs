use super::engine::{now_rfc3339, StorageEngine};
use crate::error::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Append-only audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEventRecord {
    pub id: i64,
    pub action: String,
    pub actor_id: Option<String>,
    pub team_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub metadata: String,
    pub severity: String,
    pub created_at: String,
}

impl StorageEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn append_audit_event(
        &self,
        action: &str,
        actor_id: Option<&str>,
        team_id: Option<&str>,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        metadata: &str,
        severity: &str,
    ) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO audit_events (action, actor_id, team_id, resource_type, resource_id, \
             metadata, severity, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                action,
                actor_id,
                team_id,
                resource_type,
                resource_id,
                metadata,
                severity,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn query_audit_events(
        &self,
        action: Option<&str>,
        team_id: Option<&str>,
        severity: Option<&str>,
        since: Option<&str>,
        until: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditEventRecord>> {
        let db = self.db.lock();
        let mut query = "SELECT id, action, actor_id, team_id, resource_type, resource_id, \
             metadata, severity, created_at FROM audit_events WHERE 1=1"
            .to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(a) = action {
            query.push_str(" AND action = ?");
            args.push(Box::new(a.to_string()));
        }
        if let Some(t) = team_id {
            query.push_str(" AND team_id = ?");
            args.push(Box::new(t.to_string()));
        }
        if let Some(s) = severity {
            query.push_str(" AND severity = ?");
            args.push(Box::new(s.to_string()));
        }
        if let Some(s) = since {
            query.push_str(" AND created_at >= ?");
            args.push(Box::new(s.to_string()));
        }
        if let Some(u) = until {
            query.push_str(" AND created_at <= ?");
            args.push(Box::new(u.to_string()));
        }
        query.push_str(" ORDER BY id DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = db.prepare(&query)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_refs), |row| {
                Ok(AuditEventRecord {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    actor_id: row.get(2)?,
                    team_id: row.get(3)?,
                    resource_type: row.get(4)?,
                    resource_id: row.get(5)?,
                    metadata: row.get(6)?,
                    severity: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

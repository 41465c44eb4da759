use super::engine::StorageEngine;
use crate::error::{ApiError, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

/// Canonical alert produced by the payload normalizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub status: String,
    pub source: String,
    pub external_id: Option<String>,
    pub triggered_at: String,
    pub metadata: String,
    pub integration_id: String,
    pub incident_id: Option<String>,
    pub created_at: String,
}

fn row_to_alert(row: &Row) -> rusqlite::Result<AlertRecord> {
    Ok(AlertRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        severity: row.get(3)?,
        status: row.get(4)?,
        source: row.get(5)?,
        external_id: row.get(6)?,
        triggered_at: row.get(7)?,
        metadata: row.get(8)?,
        integration_id: row.get(9)?,
        incident_id: row.get(10)?,
        created_at: row.get(11)?,
    })
}

const ALERT_COLUMNS: &str = "id, title, description, severity, status, source, external_id, \
     triggered_at, metadata, integration_id, incident_id, created_at";

impl StorageEngine {
    pub fn get_alert(&self, id: &str) -> Result<AlertRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
            params![id],
            row_to_alert,
        )
        .map_err(|_| ApiError::NotFound("alert".into(), id.into()))
    }

    pub fn list_alerts(
        &self,
        status: Option<&str>,
        severity: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AlertRecord>> {
        let db = self.db.lock();
        let mut query = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(s) = status {
            query.push_str(" AND status = ?");
            args.push(Box::new(s.to_string()));
        }
        if let Some(s) = severity {
            query.push_str(" AND severity = ?");
            args.push(Box::new(s.to_string()));
        }
        query.push_str(" ORDER BY triggered_at DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = db.prepare(&query)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params_refs), row_to_alert)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn alerts_for_incident(&self, incident_id: &str) -> Result<Vec<AlertRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE incident_id = ?1 ORDER BY triggered_at"
        ))?;
        let rows = stmt
            .query_map(params![incident_id], row_to_alert)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// First alert linked to an incident, carrier of the `tickets[]` metadata
    /// that ticketing actions append to.
    pub fn first_alert_for_incident(&self, incident_id: &str) -> Result<Option<AlertRecord>> {
        use rusqlite::OptionalExtension;
        let db = self.db.lock();
        let found = db
            .query_row(
                &format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts WHERE incident_id = ?1 \
                     ORDER BY created_at LIMIT 1"
                ),
                params![incident_id],
                row_to_alert,
            )
            .optional()?;
        Ok(found)
    }

    pub fn update_alert_metadata(&self, id: &str, metadata: &str) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE alerts SET metadata = ?2 WHERE id = ?1",
            params![id, metadata],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound("alert".into(), id.into()));
        }
        Ok(())
    }

    /// Propagate an incident transition to its alerts.
    pub fn set_alert_status_for_incident(&self, incident_id: &str, status: &str) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE alerts SET status = ?2 WHERE incident_id = ?1",
            params![incident_id, status],
        )?;
        Ok(())
    }
}

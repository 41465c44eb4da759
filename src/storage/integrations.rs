use super::engine::{now_rfc3339, StorageEngine};
use crate::error::{ApiError, Result};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

/// Inbound integration row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRecord {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub team_id: Option<String>,
    pub signing_secret: String,
    pub signature_header: String,
    pub signature_algorithm: String,
    pub signature_format: String,
    pub signature_prefix: Option<String>,
    pub timestamp_header: Option<String>,
    pub timestamp_max_age_secs: i64,
    pub dedup_window_minutes: i64,
    pub active: bool,
    pub default_service: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_integration(row: &Row) -> rusqlite::Result<IntegrationRecord> {
    Ok(IntegrationRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: row.get(2)?,
        team_id: row.get(3)?,
        signing_secret: row.get(4)?,
        signature_header: row.get(5)?,
        signature_algorithm: row.get(6)?,
        signature_format: row.get(7)?,
        signature_prefix: row.get(8)?,
        timestamp_header: row.get(9)?,
        timestamp_max_age_secs: row.get(10)?,
        dedup_window_minutes: row.get(11)?,
        active: row.get::<_, i64>(12)? != 0,
        default_service: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

const INTEGRATION_COLUMNS: &str = "id, name, provider, team_id, signing_secret, signature_header, \
     signature_algorithm, signature_format, signature_prefix, timestamp_header, \
     timestamp_max_age_secs, dedup_window_minutes, active, default_service, created_at, updated_at";

impl StorageEngine {
    pub fn create_integration(&self, rec: &IntegrationRecord) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO integrations (id, name, provider, team_id, signing_secret, \
             signature_header, signature_algorithm, signature_format, signature_prefix, \
             timestamp_header, timestamp_max_age_secs, dedup_window_minutes, active, \
             default_service, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                rec.id,
                rec.name,
                rec.provider,
                rec.team_id,
                rec.signing_secret,
                rec.signature_header,
                rec.signature_algorithm,
                rec.signature_format,
                rec.signature_prefix,
                rec.timestamp_header,
                rec.timestamp_max_age_secs,
                rec.dedup_window_minutes,
                rec.active as i64,
                rec.default_service,
                rec.created_at,
                rec.updated_at,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                ApiError::DuplicateName(format!("integration {}", rec.name))
            } else {
                ApiError::Database(e.to_string())
            }
        })?;
        Ok(())
    }

    pub fn get_integration(&self, id: &str) -> Result<IntegrationRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!("SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE id = ?1"),
            params![id],
            row_to_integration,
        )
        .map_err(|_| ApiError::NotFound("integration".into(), id.into()))
    }

    /// Lookup used by the ingest path. Inactive integrations are invisible.
    pub fn get_active_integration_by_name(&self, name: &str) -> Result<IntegrationRecord> {
        let db = self.db.lock();
        db.query_row(
            &format!(
                "SELECT {INTEGRATION_COLUMNS} FROM integrations WHERE name = ?1 AND active = 1"
            ),
            params![name],
            row_to_integration,
        )
        .map_err(|_| ApiError::IntegrationNotFound(name.into()))
    }

    pub fn list_integrations(&self) -> Result<Vec<IntegrationRecord>> {
        let db = self.db.lock();
        let mut stmt =
            db.prepare(&format!("SELECT {INTEGRATION_COLUMNS} FROM integrations ORDER BY name"))?;
        let rows = stmt
            .query_map([], row_to_integration)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn update_integration(&self, rec: &IntegrationRecord) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE integrations SET name = ?2, provider = ?3, team_id = ?4, \
             signature_header = ?5, signature_algorithm = ?6, signature_format = ?7, \
             signature_prefix = ?8, timestamp_header = ?9, timestamp_max_age_secs = ?10, \
             dedup_window_minutes = ?11, active = ?12, default_service = ?13, updated_at = ?14 \
             WHERE id = ?1",
            params![
                rec.id,
                rec.name,
                rec.provider,
                rec.team_id,
                rec.signature_header,
                rec.signature_algorithm,
                rec.signature_format,
                rec.signature_prefix,
                rec.timestamp_header,
                rec.timestamp_max_age_secs,
                rec.dedup_window_minutes,
                rec.active as i64,
                rec.default_service,
                now_rfc3339(),
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                ApiError::DuplicateName(format!("integration {}", rec.name))
            } else {
                ApiError::Database(e.to_string())
            }
        })?;
        if rows == 0 {
            return Err(ApiError::NotFound("integration".into(), rec.id.clone()));
        }
        Ok(())
    }

    /// Atomically replace the signing secret. Outstanding signatures made
    /// with the old secret stop verifying at this instant.
    pub fn rotate_integration_secret(&self, id: &str, new_secret: &str) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE integrations SET signing_secret = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, new_secret, now_rfc3339()],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound("integration".into(), id.into()));
        }
        Ok(())
    }

    pub fn delete_integration(&self, id: &str) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute("DELETE FROM integrations WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(ApiError::NotFound("integration".into(), id.into()));
        }
        Ok(())
    }
}

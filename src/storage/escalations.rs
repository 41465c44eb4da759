use super::engine::{now_rfc3339, StorageEngine};
use crate::error::{ApiError, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Escalation policy row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicyRecord {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub repeat_count: i64,
    pub is_default: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A numbered step within a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevelRecord {
    pub id: String,
    pub policy_id: String,
    pub level_number: i64,
    pub timeout_minutes: i64,
    pub targets: String,
}

/// Notification target of a level
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscalationTarget {
    User { id: String },
    Schedule { id: String },
    EntireTeam,
}

impl EscalationLevelRecord {
    pub fn parsed_targets(&self) -> Vec<EscalationTarget> {
        serde_json::from_str(&self.targets).unwrap_or_default()
    }
}

fn row_to_policy(row: &Row) -> rusqlite::Result<EscalationPolicyRecord> {
    Ok(EscalationPolicyRecord {
        id: row.get(0)?,
        team_id: row.get(1)?,
        name: row.get(2)?,
        repeat_count: row.get(3)?,
        is_default: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_level(row: &Row) -> rusqlite::Result<EscalationLevelRecord> {
    Ok(EscalationLevelRecord {
        id: row.get(0)?,
        policy_id: row.get(1)?,
        level_number: row.get(2)?,
        timeout_minutes: row.get(3)?,
        targets: row.get(4)?,
    })
}

impl StorageEngine {
    /// Create a policy. Marking it default clears the previous default for
    /// the team in the same transaction: one default per team.
    pub fn create_escalation_policy(&self, rec: &EscalationPolicyRecord) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        if rec.is_default {
            tx.execute(
                "UPDATE escalation_policies SET is_default = 0 WHERE team_id = ?1",
                params![rec.team_id],
            )?;
        }
        tx.execute(
            "INSERT INTO escalation_policies (id, team_id, name, repeat_count, is_default, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rec.id,
                rec.team_id,
                rec.name,
                rec.repeat_count,
                rec.is_default as i64,
                rec.created_at,
                rec.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_escalation_policy(&self, id: &str) -> Result<EscalationPolicyRecord> {
        let db = self.db.lock();
        db.query_row(
            "SELECT id, team_id, name, repeat_count, is_default, created_at, updated_at \
             FROM escalation_policies WHERE id = ?1",
            params![id],
            row_to_policy,
        )
        .map_err(|_| ApiError::NotFound("escalation policy".into(), id.into()))
    }

    pub fn list_escalation_policies(
        &self,
        team_id: Option<&str>,
    ) -> Result<Vec<EscalationPolicyRecord>> {
        let db = self.db.lock();
        let mut stmt;
        let rows = if let Some(team) = team_id {
            stmt = db.prepare(
                "SELECT id, team_id, name, repeat_count, is_default, created_at, updated_at \
                 FROM escalation_policies WHERE team_id = ?1 ORDER BY name",
            )?;
            stmt.query_map(params![team], row_to_policy)?
                .filter_map(|r| r.ok())
                .collect()
        } else {
            stmt = db.prepare(
                "SELECT id, team_id, name, repeat_count, is_default, created_at, updated_at \
                 FROM escalation_policies ORDER BY team_id, name",
            )?;
            stmt.query_map([], row_to_policy)?
                .filter_map(|r| r.ok())
                .collect()
        };
        Ok(rows)
    }

    pub fn default_policy_for_team(
        &self,
        team_id: &str,
    ) -> Result<Option<EscalationPolicyRecord>> {
        let db = self.db.lock();
        let found = db
            .query_row(
                "SELECT id, team_id, name, repeat_count, is_default, created_at, updated_at \
                 FROM escalation_policies WHERE team_id = ?1 AND is_default = 1",
                params![team_id],
                row_to_policy,
            )
            .optional()?;
        Ok(found)
    }

    pub fn update_escalation_policy(&self, rec: &EscalationPolicyRecord) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        if rec.is_default {
            tx.execute(
                "UPDATE escalation_policies SET is_default = 0 WHERE team_id = ?1 AND id != ?2",
                params![rec.team_id, rec.id],
            )?;
        }
        let rows = tx.execute(
            "UPDATE escalation_policies SET name = ?2, repeat_count = ?3, is_default = ?4, \
             updated_at = ?5 WHERE id = ?1",
            params![
                rec.id,
                rec.name,
                rec.repeat_count,
                rec.is_default as i64,
                now_rfc3339(),
            ],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound("escalation policy".into(), rec.id.clone()));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_escalation_policy(&self, id: &str) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute("DELETE FROM escalation_policies WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(ApiError::NotFound("escalation policy".into(), id.into()));
        }
        Ok(())
    }

    // ==================== Levels ====================

    pub fn list_levels(&self, policy_id: &str) -> Result<Vec<EscalationLevelRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, policy_id, level_number, timeout_minutes, targets \
             FROM escalation_levels WHERE policy_id = ?1 ORDER BY level_number",
        )?;
        let rows = stmt
            .query_map(params![policy_id], row_to_level)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_level(&self, policy_id: &str, number: i64) -> Result<Option<EscalationLevelRecord>> {
        let db = self.db.lock();
        let found = db
            .query_row(
                "SELECT id, policy_id, level_number, timeout_minutes, targets \
                 FROM escalation_levels WHERE policy_id = ?1 AND level_number = ?2",
                params![policy_id, number],
                row_to_level,
            )
            .optional()?;
        Ok(found)
    }

    /// Append a level at the next number, keeping numbering dense from 1.
    pub fn add_level(
        &self,
        policy_id: &str,
        timeout_minutes: i64,
        targets: &str,
    ) -> Result<EscalationLevelRecord> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(level_number), 0) + 1 FROM escalation_levels WHERE policy_id = ?1",
            params![policy_id],
            |row| row.get(0),
        )?;
        let rec = EscalationLevelRecord {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            level_number: next,
            timeout_minutes,
            targets: targets.to_string(),
        };
        tx.execute(
            "INSERT INTO escalation_levels (id, policy_id, level_number, timeout_minutes, targets) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rec.id, rec.policy_id, rec.level_number, rec.timeout_minutes, rec.targets],
        )?;
        tx.commit()?;
        Ok(rec)
    }

    pub fn update_level(
        &self,
        policy_id: &str,
        number: i64,
        timeout_minutes: i64,
        targets: &str,
    ) -> Result<()> {
        let db = self.db.lock();
        let rows = db.execute(
            "UPDATE escalation_levels SET timeout_minutes = ?3, targets = ?4 \
             WHERE policy_id = ?1 AND level_number = ?2",
            params![policy_id, number, timeout_minutes, targets],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound(
                "escalation level".into(),
                format!("{policy_id}#{number}"),
            ));
        }
        Ok(())
    }

    /// Remove a level and renumber the ones after it, keeping the sequence
    /// dense and 1-based.
    pub fn delete_level(&self, policy_id: &str, number: i64) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let rows = tx.execute(
            "DELETE FROM escalation_levels WHERE policy_id = ?1 AND level_number = ?2",
            params![policy_id, number],
        )?;
        if rows == 0 {
            return Err(ApiError::NotFound(
                "escalation level".into(),
                format!("{policy_id}#{number}"),
            ));
        }
        tx.execute(
            "UPDATE escalation_levels SET level_number = level_number - 1 \
             WHERE policy_id = ?1 AND level_number > ?2",
            params![policy_id, number],
        )?;
        tx.commit()?;
        Ok(())
    }
}

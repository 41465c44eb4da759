//! Escalation policy management

use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::Actor;
use crate::storage::{now_rfc3339, EscalationPolicyRecord, EscalationTarget};
use crate::Platform;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct PolicyInput {
    pub team_id: String,
    pub name: String,
    #[serde(default)]
    pub repeat_count: i64,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub levels: Vec<LevelInput>,
}

#[derive(Debug, Deserialize)]
pub struct LevelInput {
    pub timeout_minutes: i64,
    #[serde(default)]
    pub targets: Vec<EscalationTarget>,
}

fn validate_level(level: &LevelInput) -> Result<()> {
    if level.timeout_minutes <= 0 {
        return Err(ApiError::ValidationFailed(vec![
            "timeout_minutes must be positive".to_string(),
        ]));
    }
    Ok(())
}

pub fn create(platform: &Platform, input: &PolicyInput, actor: &Actor) -> Result<Value> {
    if input.name.trim().is_empty() {
        return Err(ApiError::ValidationFailed(vec![
            "name must be non-empty".to_string(),
        ]));
    }
    if input.repeat_count < 0 {
        return Err(ApiError::ValidationFailed(vec![
            "repeat_count must not be negative".to_string(),
        ]));
    }
    for level in &input.levels {
        validate_level(level)?;
    }

    let now = now_rfc3339();
    let record = EscalationPolicyRecord {
        id: uuid::Uuid::new_v4().to_string(),
        team_id: input.team_id.clone(),
        name: input.name.clone(),
        repeat_count: input.repeat_count,
        is_default: input.is_default,
        created_at: now.clone(),
        updated_at: now,
    };
    platform.storage.create_escalation_policy(&record)?;

    // Levels land densely numbered from 1 in input order.
    for level in &input.levels {
        platform.storage.add_level(
            &record.id,
            level.timeout_minutes,
            &serde_json::to_string(&level.targets)?,
        )?;
    }

    audit::record(
        &platform.storage,
        "escalation_policy.created",
        actor.id_str(),
        Some(&record.team_id),
        Some("escalation_policy"),
        Some(&record.id),
        json!({ "name": record.name, "levels": input.levels.len() }),
        "INFO",
    );
    policy_json(platform, &record.id)
}

pub fn policy_json(platform: &Platform, id: &str) -> Result<Value> {
    let policy = platform.storage.get_escalation_policy(id)?;
    let levels = platform.storage.list_levels(id)?;
    Ok(json!({
        "id": policy.id,
        "team_id": policy.team_id,
        "name": policy.name,
        "repeat_count": policy.repeat_count,
        "is_default": policy.is_default,
        "created_at": policy.created_at,
        "updated_at": policy.updated_at,
        "levels": levels
            .iter()
            .map(|level| {
                json!({
                    "number": level.level_number,
                    "timeout_minutes": level.timeout_minutes,
                    "targets": level.parsed_targets(),
                })
            })
            .collect::<Vec<_>>(),
    }))
}

pub fn update(platform: &Platform, id: &str, input: &PolicyInput, actor: &Actor) -> Result<Value> {
    let mut record = platform.storage.get_escalation_policy(id)?;
    record.name = input.name.clone();
    record.repeat_count = input.repeat_count;
    record.is_default = input.is_default;
    platform.storage.update_escalation_policy(&record)?;
    audit::record(
        &platform.storage,
        "escalation_policy.updated",
        actor.id_str(),
        Some(&record.team_id),
        Some("escalation_policy"),
        Some(id),
        json!({ "name": record.name }),
        "INFO",
    );
    policy_json(platform, id)
}

pub fn delete(platform: &Platform, id: &str, actor: &Actor) -> Result<()> {
    let record = platform.storage.get_escalation_policy(id)?;
    platform.storage.delete_escalation_policy(id)?;
    audit::record(
        &platform.storage,
        "escalation_policy.deleted",
        actor.id_str(),
        Some(&record.team_id),
        Some("escalation_policy"),
        Some(id),
        json!({ "name": record.name }),
        "MEDIUM",
    );
    Ok(())
}

pub fn add_level(platform: &Platform, policy_id: &str, input: &LevelInput, actor: &Actor) -> Result<Value> {
    validate_level(input)?;
    platform.storage.get_escalation_policy(policy_id)?;
    let level = platform.storage.add_level(
        policy_id,
        input.timeout_minutes,
        &serde_json::to_string(&input.targets)?,
    )?;
    audit::record(
        &platform.storage,
        "escalation_policy.level_added",
        actor.id_str(),
        None,
        Some("escalation_policy"),
        Some(policy_id),
        json!({ "number": level.level_number }),
        "INFO",
    );
    policy_json(platform, policy_id)
}

pub fn update_level(
    platform: &Platform,
    policy_id: &str,
    number: i64,
    input: &LevelInput,
    actor: &Actor,
) -> Result<Value> {
    validate_level(input)?;
    platform.storage.update_level(
        policy_id,
        number,
        input.timeout_minutes,
        &serde_json::to_string(&input.targets)?,
    )?;
    audit::record(
        &platform.storage,
        "escalation_policy.level_updated",
        actor.id_str(),
        None,
        Some("escalation_policy"),
        Some(policy_id),
        json!({ "number": number }),
        "INFO",
    );
    policy_json(platform, policy_id)
}

pub fn delete_level(platform: &Platform, policy_id: &str, number: i64, actor: &Actor) -> Result<Value> {
    platform.storage.delete_level(policy_id, number)?;
    audit::record(
        &platform.storage,
        "escalation_policy.level_deleted",
        actor.id_str(),
        None,
        Some("escalation_policy"),
        Some(policy_id),
        json!({ "number": number }),
        "INFO",
    );
    policy_json(platform, policy_id)
}

//! Workflow CRUD, versioning and manual execution

use super::definition::WorkflowDefinition;
use super::engine;
use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::Actor;
use crate::storage::{now_rfc3339, WorkflowExecutionRecord, WorkflowRecord};
use crate::Platform;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn default_scope() -> String {
    "team".to_string()
}

/// Create/update payload
#[derive(Debug, Deserialize)]
pub struct WorkflowInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub definition: Value,
}

/// Parse and structurally validate a definition payload.
fn checked_definition(raw: &Value) -> Result<WorkflowDefinition> {
    let definition: WorkflowDefinition = serde_json::from_value(raw.clone())
        .map_err(|e| ApiError::ValidationFailed(vec![format!("invalid definition: {e}")]))?;
    definition.validate().map_err(ApiError::ValidationFailed)?;
    Ok(definition)
}

fn checked_scope(input: &WorkflowInput) -> Result<()> {
    match input.scope.as_str() {
        "global" => Ok(()),
        "team" if input.team_id.is_some() => Ok(()),
        "team" => Err(ApiError::ValidationFailed(vec![
            "team-scoped workflows need a team_id".to_string(),
        ])),
        other => Err(ApiError::ValidationFailed(vec![format!(
            "unknown scope: {other}"
        )])),
    }
}

pub fn create(platform: &Platform, input: &WorkflowInput, actor: &Actor) -> Result<WorkflowRecord> {
    checked_scope(input)?;
    let definition = checked_definition(&input.definition)?;
    let now = now_rfc3339();

    let record = WorkflowRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: input.name.clone(),
        description: input.description.clone(),
        scope: input.scope.clone(),
        team_id: input.team_id.clone(),
        version: 1,
        enabled: definition.settings.enabled,
        definition: serde_json::to_string(&definition)?,
        is_template: false,
        template_category: None,
        created_at: now.clone(),
        updated_at: now,
    };
    platform.storage.create_workflow(&record, actor.id_str())?;
    audit::record(
        &platform.storage,
        "workflow.created",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("workflow"),
        Some(&record.id),
        json!({ "name": record.name }),
        "INFO",
    );
    Ok(record)
}

/// Apply an edit: version bumps by one and a snapshot row is written.
pub fn update(
    platform: &Platform,
    id: &str,
    input: &WorkflowInput,
    actor: &Actor,
) -> Result<WorkflowRecord> {
    checked_scope(input)?;
    let definition = checked_definition(&input.definition)?;
    let serialized = serde_json::to_string(&definition)?;

    let new_version = platform.storage.update_workflow_definition(
        id,
        &input.name,
        &input.description,
        &serialized,
        "updated",
        actor.id_str(),
    )?;
    audit::record(
        &platform.storage,
        "workflow.updated",
        actor.id_str(),
        input.team_id.as_deref(),
        Some("workflow"),
        Some(id),
        json!({ "version": new_version }),
        "INFO",
    );
    platform.storage.get_workflow(id)
}

pub fn toggle(platform: &Platform, id: &str, enabled: bool, actor: &Actor) -> Result<WorkflowRecord> {
    platform.storage.set_workflow_enabled(id, enabled)?;
    let record = platform.storage.get_workflow(id)?;
    audit::record(
        &platform.storage,
        if enabled { "workflow.enabled" } else { "workflow.disabled" },
        actor.id_str(),
        record.team_id.as_deref(),
        Some("workflow"),
        Some(id),
        json!({}),
        "INFO",
    );
    Ok(record)
}

pub fn delete(platform: &Platform, id: &str, actor: &Actor) -> Result<()> {
    let record = platform.storage.get_workflow(id)?;
    platform.storage.delete_workflow(id)?;
    audit::record(
        &platform.storage,
        "workflow.deleted",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("workflow"),
        Some(id),
        json!({ "name": record.name }),
        "MEDIUM",
    );
    Ok(())
}

/// Copy a workflow under a new name, disabled until someone turns it on.
pub fn duplicate(platform: &Platform, id: &str, actor: &Actor) -> Result<WorkflowRecord> {
    let source = platform.storage.get_workflow(id)?;
    let now = now_rfc3339();
    let copy = WorkflowRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: format!("{} (copy)", source.name),
        version: 1,
        enabled: false,
        is_template: false,
        template_category: None,
        created_at: now.clone(),
        updated_at: now,
        ..source
    };
    platform.storage.create_workflow(&copy, actor.id_str())?;
    Ok(copy)
}

/// Export the portable subset: name, description, scope, team and
/// definition. Team-scoped exports keep their team so a round-trip through
/// import lands back in the same place.
pub fn export(platform: &Platform, id: &str) -> Result<Value> {
    let record = platform.storage.get_workflow(id)?;
    let definition: Value = serde_json::from_str(&record.definition)?;
    Ok(json!({
        "name": record.name,
        "description": record.description,
        "scope": record.scope,
        "team_id": record.team_id,
        "definition": definition,
    }))
}

/// Import an exported workflow. The definition round-trips unchanged; a
/// caller-supplied `team_id` in the payload overrides the exported one.
pub fn import(platform: &Platform, payload: &Value, actor: &Actor) -> Result<WorkflowRecord> {
    let input: WorkflowInput = serde_json::from_value(payload.clone())
        .map_err(|e| ApiError::ValidationFailed(vec![format!("invalid import payload: {e}")]))?;
    create(platform, &input, actor)
}

/// Roll back by writing version N's definition as a fresh version.
pub fn rollback(platform: &Platform, id: &str, version: i64, actor: &Actor) -> Result<WorkflowRecord> {
    let record = platform.storage.get_workflow(id)?;
    let snapshot = platform.storage.get_workflow_version(id, version)?;
    let new_version = platform.storage.update_workflow_definition(
        id,
        &record.name,
        &record.description,
        &snapshot.definition,
        &format!("rolled back to version {version}"),
        actor.id_str(),
    )?;
    audit::record(
        &platform.storage,
        "workflow.rolled_back",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("workflow"),
        Some(id),
        json!({ "from_version": version, "new_version": new_version }),
        "MEDIUM",
    );
    platform.storage.get_workflow(id)
}

/// Manual runs bypass trigger-condition evaluation.
pub async fn execute_manual(
    platform: &Arc<Platform>,
    id: &str,
    incident_id: Option<&str>,
    actor: &Actor,
) -> Result<WorkflowExecutionRecord> {
    let workflow = platform.storage.get_workflow(id)?;
    if let Some(incident_id) = incident_id {
        // Surface a 404 up front instead of a failed execution.
        platform.storage.get_incident(incident_id)?;
    }
    let execution = engine::enqueue(platform, &workflow, incident_id).await?;
    audit::record(
        &platform.storage,
        "workflow.executed_manually",
        actor.id_str(),
        workflow.team_id.as_deref(),
        Some("workflow"),
        Some(id),
        json!({ "execution_id": execution.id, "incident_id": incident_id }),
        "INFO",
    );
    Ok(execution)
}

/// Execution totals and average duration.
pub fn analytics(platform: &Platform, id: &str) -> Result<Value> {
    platform.storage.get_workflow(id)?;
    let executions = platform.storage.list_workflow_executions(id, 1000)?;

    let mut completed = 0u64;
    let mut failed = 0u64;
    let mut cancelled = 0u64;
    let mut durations_ms = Vec::new();

    for execution in &executions {
        match execution.status.as_str() {
            "COMPLETED" => completed += 1,
            "FAILED" => failed += 1,
            "CANCELLED" => cancelled += 1,
            _ => {}
        }
        if let (Some(start), Some(end)) = (&execution.started_at, &execution.completed_at) {
            if let (Ok(start), Ok(end)) = (
                chrono::DateTime::parse_from_rfc3339(start),
                chrono::DateTime::parse_from_rfc3339(end),
            ) {
                durations_ms.push(end.signed_duration_since(start).num_milliseconds());
            }
        }
    }

    let avg_duration_ms = if durations_ms.is_empty() {
        Value::Null
    } else {
        json!(durations_ms.iter().sum::<i64>() / durations_ms.len() as i64)
    };

    Ok(json!({
        "total_executions": executions.len(),
        "completed": completed,
        "failed": failed,
        "cancelled": cancelled,
        "avg_duration_ms": avg_duration_ms,
    }))
}

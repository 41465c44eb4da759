//! Seeded workflow templates
//!
//! Templates are workflow rows flagged `is_template` with a category. They
//! never match triggers; `use` instantiates a real workflow from one.

use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::Actor;
use crate::storage::{now_rfc3339, StorageEngine, WorkflowRecord};
use crate::Platform;
use serde_json::{json, Value};
use tracing::info;

pub const CATEGORIES: &[&str] = &["Ticketing", "Communication", "Auto-resolution"];

/// Insert the built-in templates once, at first boot.
pub fn seed(storage: &StorageEngine) -> Result<()> {
    let existing = storage.list_workflow_templates(None)?;
    if !existing.is_empty() {
        return Ok(());
    }

    for (name, description, category, definition) in builtin_templates() {
        let now = now_rfc3339();
        let record = WorkflowRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            scope: "global".to_string(),
            team_id: None,
            version: 1,
            enabled: false,
            definition: definition.to_string(),
            is_template: true,
            template_category: Some(category.to_string()),
            created_at: now.clone(),
            updated_at: now,
        };
        storage.create_workflow(&record, None)?;
    }
    info!("seeded built-in workflow templates");
    Ok(())
}

fn builtin_templates() -> Vec<(&'static str, &'static str, &'static str, Value)> {
    vec![
        (
            "Jira ticket for critical incidents",
            "Opens a Jira issue whenever a CRITICAL incident is created",
            "Ticketing",
            json!({
                "nodes": [
                    {"id": "trigger", "type": "trigger"},
                    {"id": "create-ticket", "type": "action", "name": "Create Jira issue",
                     "config": {
                        "kind": "jira",
                        "base_url": "https://your-org.atlassian.net",
                        "email": "bot@your-org.example",
                        "api_token": "REPLACE_ME",
                        "project_key": "OPS",
                        "summary": "[{{incident.severity}}] {{incident.title}}",
                        "description": "Incident {{incident.id}} ({{incident.alert_count}} alerts)"
                     }}
                ],
                "edges": [{"source": "trigger", "target": "create-ticket"}],
                "trigger": {
                    "type": "incident_created",
                    "conditions": {"incident.severity": "CRITICAL"}
                },
                "settings": {"timeout": "5min", "enabled": true}
            }),
        ),
        (
            "Notify incident channel",
            "Posts every new incident to a chat webhook",
            "Communication",
            json!({
                "nodes": [
                    {"id": "trigger", "type": "trigger"},
                    {"id": "notify", "type": "action", "name": "Post to channel",
                     "config": {
                        "kind": "webhook",
                        "url": "https://chat.example.com/hooks/REPLACE_ME",
                        "method": "POST",
                        "body": {
                            "text": "[{{incident.severity}}] {{incident.title}} ({{incident.id}})"
                        }
                     }}
                ],
                "edges": [{"source": "trigger", "target": "notify"}],
                "trigger": {"type": "incident_created"},
                "settings": {"timeout": "1min", "enabled": true}
            }),
        ),
        (
            "Close the loop on informational incidents",
            "Flags INFO incidents to an automation endpoint for auto-resolution",
            "Auto-resolution",
            json!({
                "nodes": [
                    {"id": "trigger", "type": "trigger"},
                    {"id": "check-severity", "type": "condition", "name": "Informational?",
                     "config": {"field": "incident.severity", "value": "INFO"}},
                    {"id": "auto-resolve", "type": "action", "name": "Request auto-resolve",
                     "config": {
                        "kind": "webhook",
                        "url": "https://automation.example.com/resolve",
                        "method": "POST",
                        "body": {"incident_id": "{{incident.id}}"}
                     }},
                    {"id": "escalate-note", "type": "action", "name": "Note for humans",
                     "config": {
                        "kind": "webhook",
                        "url": "https://chat.example.com/hooks/REPLACE_ME",
                        "method": "POST",
                        "body": {"text": "Needs a human: {{incident.title}}"}
                     }}
                ],
                "edges": [
                    {"source": "trigger", "target": "check-severity"},
                    {"source": "check-severity", "target": "auto-resolve", "branch": "true"},
                    {"source": "check-severity", "target": "escalate-note", "branch": "false"}
                ],
                "trigger": {"type": "incident_created"},
                "settings": {"timeout": "1min", "enabled": true}
            }),
        ),
    ]
}

pub fn list(platform: &Platform, category: Option<&str>) -> Result<Vec<WorkflowRecord>> {
    if let Some(category) = category {
        if !CATEGORIES.contains(&category) {
            return Err(ApiError::ValidationFailed(vec![format!(
                "unknown template category: {category}"
            )]));
        }
    }
    platform.storage.list_workflow_templates(category)
}

pub fn get(platform: &Platform, id: &str) -> Result<WorkflowRecord> {
    let record = platform.storage.get_workflow(id)?;
    if !record.is_template {
        return Err(ApiError::NotFound("workflow template".into(), id.into()));
    }
    Ok(record)
}

/// Instantiate a template into a team workflow.
pub fn use_template(
    platform: &Platform,
    template_id: &str,
    name: Option<&str>,
    team_id: Option<&str>,
    actor: &Actor,
) -> Result<WorkflowRecord> {
    let template = get(platform, template_id)?;
    let now = now_rfc3339();
    let record = WorkflowRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.unwrap_or(&template.name).to_string(),
        description: template.description.clone(),
        scope: if team_id.is_some() { "team" } else { "global" }.to_string(),
        team_id: team_id.map(|s| s.to_string()),
        version: 1,
        enabled: false,
        definition: template.definition.clone(),
        is_template: false,
        template_category: None,
        created_at: now.clone(),
        updated_at: now,
    };
    platform.storage.create_workflow(&record, actor.id_str())?;
    audit::record(
        &platform.storage,
        "workflow.created_from_template",
        actor.id_str(),
        team_id,
        Some("workflow"),
        Some(&record.id),
        json!({ "template_id": template_id }),
        "INFO",
    );
    Ok(record)
}

/// Platform-admin template creation.
pub fn create_template(
    platform: &Platform,
    name: &str,
    description: &str,
    category: &str,
    definition: &Value,
    actor: &Actor,
) -> Result<WorkflowRecord> {
    actor.require_platform_admin()?;
    if !CATEGORIES.contains(&category) {
        return Err(ApiError::ValidationFailed(vec![format!(
            "unknown template category: {category}"
        )]));
    }
    let parsed: super::definition::WorkflowDefinition =
        serde_json::from_value(definition.clone())
            .map_err(|e| ApiError::ValidationFailed(vec![format!("invalid definition: {e}")]))?;
    parsed.validate().map_err(ApiError::ValidationFailed)?;

    let now = now_rfc3339();
    let record = WorkflowRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: description.to_string(),
        scope: "global".to_string(),
        team_id: None,
        version: 1,
        enabled: false,
        definition: serde_json::to_string(&parsed)?,
        is_template: true,
        template_category: Some(category.to_string()),
        created_at: now.clone(),
        updated_at: now,
    };
    platform.storage.create_workflow(&record, actor.id_str())?;
    audit::record(
        &platform.storage,
        "workflow_template.created",
        actor.id_str(),
        None,
        Some("workflow_template"),
        Some(&record.id),
        json!({ "name": name, "category": category }),
        "INFO",
    );
    Ok(record)
}

/// Platform-admin template edit; versioned like any workflow.
pub fn update_template(
    platform: &Platform,
    id: &str,
    name: &str,
    description: &str,
    definition: &Value,
    actor: &Actor,
) -> Result<WorkflowRecord> {
    actor.require_platform_admin()?;
    get(platform, id)?;
    let parsed: super::definition::WorkflowDefinition = serde_json::from_value(definition.clone())
        .map_err(|e| ApiError::ValidationFailed(vec![format!("invalid definition: {e}")]))?;
    parsed.validate().map_err(ApiError::ValidationFailed)?;

    let new_version = platform.storage.update_workflow_definition(
        id,
        name,
        description,
        &serde_json::to_string(&parsed)?,
        "template updated",
        actor.id_str(),
    )?;
    audit::record(
        &platform.storage,
        "workflow_template.updated",
        actor.id_str(),
        None,
        Some("workflow_template"),
        Some(id),
        json!({ "version": new_version }),
        "INFO",
    );
    platform.storage.get_workflow(id)
}

pub fn delete_template(platform: &Platform, id: &str, actor: &Actor) -> Result<()> {
    actor.require_platform_admin()?;
    let template = get(platform, id)?;
    platform.storage.delete_workflow(id)?;
    audit::record(
        &platform.storage,
        "workflow_template.deleted",
        actor.id_str(),
        None,
        Some("workflow_template"),
        Some(id),
        json!({ "name": template.name }),
        "MEDIUM",
    );
    Ok(())
}

//! Runbook CRUD and the approval state machine

use crate::actions::ActionAuth;
use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::Actor;
use crate::storage::{now_rfc3339, RunbookRecord};
use crate::Platform;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const METHODS: &[&str] = &["POST", "PUT", "PATCH"];
const PARAM_TYPES: &[&str] = &["string", "number", "boolean"];
pub const MIN_TIMEOUT_SECS: i64 = 30;
pub const MAX_TIMEOUT_SECS: i64 = 900;

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> i64 {
    MIN_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
pub struct RunbookInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub webhook_url: String,
    #[serde(default = "default_method")]
    pub http_method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: Value,
    #[serde(default)]
    pub parameter_schema: Value,
    #[serde(default)]
    pub payload_template: Value,
    #[serde(default = "default_timeout")]
    pub timeout_secs: i64,
    #[serde(default)]
    pub team_id: Option<String>,
}

fn validate(input: &RunbookInput) -> Result<()> {
    let mut errors = Vec::new();

    if input.name.trim().is_empty() {
        errors.push("name must be non-empty".to_string());
    }
    if !input.webhook_url.starts_with("http://") && !input.webhook_url.starts_with("https://") {
        errors.push("webhook_url must be an http(s) URL".to_string());
    }
    if !METHODS.contains(&input.http_method.to_uppercase().as_str()) {
        errors.push(format!("unsupported method: {}", input.http_method));
    }
    if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&input.timeout_secs) {
        errors.push(format!(
            "timeout_secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}"
        ));
    }
    if !input.auth.is_null() {
        if let Err(e) = serde_json::from_value::<ActionAuth>(input.auth.clone()) {
            errors.push(format!("invalid auth config: {e}"));
        }
    }
    if let Err(mut schema_errors) = validate_parameter_schema(&input.parameter_schema) {
        errors.append(&mut schema_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::ValidationFailed(errors))
    }
}

/// The parameter schema is a flat object: name → {type, default?, enum?,
/// required?} with scalar types only.
fn validate_parameter_schema(schema: &Value) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let Some(schema) = schema.as_object() else {
        if schema.is_null() {
            return Ok(());
        }
        return Err(vec!["parameter_schema must be an object".to_string()]);
    };

    for (name, spec) in schema {
        let Some(spec) = spec.as_object() else {
            errors.push(format!("parameter {name} must be described by an object"));
            continue;
        };
        match spec.get("type").and_then(|t| t.as_str()) {
            Some(t) if PARAM_TYPES.contains(&t) => {}
            Some(t) => errors.push(format!("parameter {name} has unknown type: {t}")),
            None => errors.push(format!("parameter {name} is missing a type")),
        }
        if let Some(enum_values) = spec.get("enum") {
            if !enum_values.is_array() {
                errors.push(format!("parameter {name} enum must be an array"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn record_from_input(input: &RunbookInput, id: String, version: i64) -> Result<RunbookRecord> {
    let now = now_rfc3339();
    let auth = if input.auth.is_null() {
        json!({"type": "none"}).to_string()
    } else {
        input.auth.to_string()
    };
    Ok(RunbookRecord {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        webhook_url: input.webhook_url.clone(),
        http_method: input.http_method.to_uppercase(),
        headers: serde_json::to_string(&input.headers)?,
        auth,
        parameter_schema: if input.parameter_schema.is_null() {
            "{}".to_string()
        } else {
            input.parameter_schema.to_string()
        },
        payload_template: if input.payload_template.is_null() {
            "{}".to_string()
        } else {
            input.payload_template.to_string()
        },
        timeout_secs: input.timeout_secs,
        team_id: input.team_id.clone(),
        version,
        approval_status: "DRAFT".to_string(),
        approved_by: None,
        approved_at: None,
        deprecation_reason: None,
        created_at: now.clone(),
        updated_at: now,
    })
}

pub fn create(platform: &Platform, input: &RunbookInput, actor: &Actor) -> Result<RunbookRecord> {
    validate(input)?;
    let record = record_from_input(input, uuid::Uuid::new_v4().to_string(), 1)?;
    platform.storage.create_runbook(&record, actor.id_str())?;
    audit::record(
        &platform.storage,
        "runbook.created",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("runbook"),
        Some(&record.id),
        json!({ "name": record.name }),
        "INFO",
    );
    Ok(record)
}

/// Edit a runbook definition. An APPROVED runbook drops back to DRAFT in
/// the same transaction, approval metadata cleared.
pub fn update(
    platform: &Platform,
    id: &str,
    input: &RunbookInput,
    actor: &Actor,
) -> Result<RunbookRecord> {
    validate(input)?;
    let current = platform.storage.get_runbook(id)?;
    let mut updated = record_from_input(input, id.to_string(), current.version)?;
    updated.created_at = current.created_at.clone();

    let was_approved = current.approval_status == "APPROVED";
    let record = platform
        .storage
        .update_runbook_definition(&updated, "updated", actor.id_str())?;
    audit::record(
        &platform.storage,
        "runbook.updated",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("runbook"),
        Some(id),
        json!({ "version": record.version, "demoted_from_approved": was_approved }),
        if was_approved { "MEDIUM" } else { "INFO" },
    );
    Ok(record)
}

pub fn approve(platform: &Platform, id: &str, actor: &Actor) -> Result<RunbookRecord> {
    actor.require_platform_admin()?;
    let approver = actor
        .id_str()
        .ok_or_else(|| ApiError::PermissionDenied("approver identity required".to_string()))?;
    let record = platform.storage.approve_runbook(id, approver)?;
    audit::record(
        &platform.storage,
        "runbook.approved",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("runbook"),
        Some(id),
        json!({ "version": record.version }),
        "MEDIUM",
    );
    Ok(record)
}

pub fn deprecate(
    platform: &Platform,
    id: &str,
    reason: &str,
    actor: &Actor,
) -> Result<RunbookRecord> {
    actor.require_platform_admin()?;
    let by = actor
        .id_str()
        .ok_or_else(|| ApiError::PermissionDenied("actor identity required".to_string()))?;
    let record = platform.storage.deprecate_runbook(id, by, reason)?;
    audit::record(
        &platform.storage,
        "runbook.deprecated",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("runbook"),
        Some(id),
        json!({ "version": record.version, "reason": reason }),
        "MEDIUM",
    );
    Ok(record)
}

/// Roll back to version N: its definition becomes a fresh version N+1 in
/// DRAFT, re-approval required.
pub fn rollback(platform: &Platform, id: &str, version: i64, actor: &Actor) -> Result<RunbookRecord> {
    let current = platform.storage.get_runbook(id)?;
    let snapshot = platform.storage.get_runbook_version(id, version)?;
    let definition: Value = serde_json::from_str(&snapshot.definition)?;

    let empty = Map::new();
    let def = definition.as_object().unwrap_or(&empty);
    let mut updated = current.clone();
    updated.name = def
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(&current.name)
        .to_string();
    updated.description = def
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or(&current.description)
        .to_string();
    updated.webhook_url = def
        .get("webhook_url")
        .and_then(|v| v.as_str())
        .unwrap_or(&current.webhook_url)
        .to_string();
    updated.http_method = def
        .get("http_method")
        .and_then(|v| v.as_str())
        .unwrap_or(&current.http_method)
        .to_string();
    updated.headers = def
        .get("headers")
        .map(|v| v.to_string())
        .unwrap_or_else(|| current.headers.clone());
    updated.auth = def
        .get("auth")
        .map(|v| v.to_string())
        .unwrap_or_else(|| current.auth.clone());
    updated.parameter_schema = def
        .get("parameter_schema")
        .map(|v| v.to_string())
        .unwrap_or_else(|| current.parameter_schema.clone());
    updated.payload_template = def
        .get("payload_template")
        .map(|v| v.to_string())
        .unwrap_or_else(|| current.payload_template.clone());
    updated.timeout_secs = def
        .get("timeout_secs")
        .and_then(|v| v.as_i64())
        .unwrap_or(current.timeout_secs);

    let record = platform.storage.update_runbook_definition(
        &updated,
        &format!("rolled back to version {version}"),
        actor.id_str(),
    )?;
    audit::record(
        &platform.storage,
        "runbook.rolled_back",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("runbook"),
        Some(id),
        json!({ "from_version": version, "new_version": record.version }),
        "MEDIUM",
    );
    Ok(record)
}

pub fn delete(platform: &Platform, id: &str, actor: &Actor) -> Result<()> {
    let record = platform.storage.get_runbook(id)?;
    platform.storage.delete_runbook(id)?;
    audit::record(
        &platform.storage,
        "runbook.deleted",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("runbook"),
        Some(id),
        json!({ "name": record.name }),
        "MEDIUM",
    );
    Ok(())
}

/// Public JSON view of a runbook row.
pub fn runbook_json(record: &RunbookRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "description": record.description,
        "webhook_url": record.webhook_url,
        "http_method": record.http_method,
        "headers": serde_json::from_str::<Value>(&record.headers).unwrap_or_else(|_| json!({})),
        "parameter_schema": serde_json::from_str::<Value>(&record.parameter_schema)
            .unwrap_or_else(|_| json!({})),
        "payload_template": serde_json::from_str::<Value>(&record.payload_template)
            .unwrap_or_else(|_| json!({})),
        "timeout_secs": record.timeout_secs,
        "team_id": record.team_id,
        "version": record.version,
        "approval_status": record.approval_status,
        "approved_by": record.approved_by,
        "approved_at": record.approved_at,
        "deprecation_reason": record.deprecation_reason,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

//! Runbook webhook execution

use crate::actions::template::interpolate_value;
use crate::actions::{truncate_body, ActionAuth};
use crate::error::{ApiError, Result};
use crate::storage::{now_rfc3339, RunbookExecutionRecord, RunbookRecord};
use crate::Platform;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::service::{MAX_TIMEOUT_SECS, MIN_TIMEOUT_SECS};

pub async fn execute_by_id(
    platform: &Arc<Platform>,
    runbook_id: &str,
    parameters: &Value,
    triggered_by: &str,
    incident_id: Option<&str>,
) -> Result<RunbookExecutionRecord> {
    let runbook = platform.storage.get_runbook(runbook_id)?;
    execute(platform, &runbook, parameters, triggered_by, incident_id).await
}

/// Run the runbook's webhook with type-checked parameters. Every invocation
/// leaves an execution row; DEPRECATED runbooks never run.
pub async fn execute(
    platform: &Arc<Platform>,
    runbook: &RunbookRecord,
    parameters: &Value,
    triggered_by: &str,
    incident_id: Option<&str>,
) -> Result<RunbookExecutionRecord> {
    if runbook.approval_status == "DEPRECATED" {
        return Err(ApiError::InvalidRequest(
            "deprecated runbooks cannot be executed".to_string(),
        ));
    }

    let schema: Value = serde_json::from_str(&runbook.parameter_schema)
        .unwrap_or_else(|_| json!({}));
    let parameters = check_parameters(&schema, parameters)?;

    let mut execution = RunbookExecutionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        runbook_id: runbook.id.clone(),
        incident_id: incident_id.map(|s| s.to_string()),
        parameters: parameters.to_string(),
        triggered_by: triggered_by.to_string(),
        status: "PENDING".to_string(),
        status_code: None,
        response_body: None,
        error: None,
        duration_ms: None,
        started_at: None,
        finished_at: None,
        created_at: now_rfc3339(),
    };
    platform.storage.create_runbook_execution(&execution)?;
    platform.storage.mark_runbook_execution_running(&execution.id)?;
    execution.status = "RUNNING".to_string();

    let context = json!({
        "parameters": parameters,
        "incident": incident_id
            .and_then(|id| platform.storage.get_incident(id).ok())
            .map(|i| json!({ "id": i.id, "title": i.title, "severity": i.severity }))
            .unwrap_or(Value::Null),
    });
    let template: Value =
        serde_json::from_str(&runbook.payload_template).unwrap_or_else(|_| json!({}));
    let payload = interpolate_value(&template, &context);

    let started = Instant::now();
    let outcome = send(platform, runbook, &payload).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    match outcome {
        Ok((status_code, body)) => {
            info!(runbook_id = %runbook.id, execution_id = %execution.id, status_code, "runbook executed");
            platform.storage.finalize_runbook_execution(
                &execution.id,
                "SUCCESS",
                Some(status_code),
                Some(&body),
                None,
                duration_ms,
            )?;
            execution.status = "SUCCESS".to_string();
            execution.status_code = Some(status_code);
            execution.response_body = Some(body);
        }
        Err(message) => {
            warn!(runbook_id = %runbook.id, execution_id = %execution.id, "runbook failed: {message}");
            platform.storage.finalize_runbook_execution(
                &execution.id,
                "FAILED",
                None,
                None,
                Some(&message),
                duration_ms,
            )?;
            execution.status = "FAILED".to_string();
            execution.error = Some(message);
        }
    }
    execution.duration_ms = Some(duration_ms);
    execution.finished_at = Some(now_rfc3339());
    Ok(execution)
}

async fn send(
    platform: &Arc<Platform>,
    runbook: &RunbookRecord,
    payload: &Value,
) -> std::result::Result<(i64, String), String> {
    let method = match runbook.http_method.as_str() {
        "PUT" => reqwest::Method::PUT,
        "PATCH" => reqwest::Method::PATCH,
        _ => reqwest::Method::POST,
    };
    let timeout = Duration::from_secs(
        runbook
            .timeout_secs
            .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS) as u64,
    );

    let mut request = platform
        .actions
        .http
        .request(method, &runbook.webhook_url)
        .timeout(timeout)
        .json(payload);

    let headers: HashMap<String, String> =
        serde_json::from_str(&runbook.headers).unwrap_or_default();
    for (name, value) in &headers {
        request = request.header(name, value);
    }

    let auth: ActionAuth = serde_json::from_str(&runbook.auth).unwrap_or_default();
    request = match &auth {
        ActionAuth::None => request,
        ActionAuth::Bearer { token } => request.bearer_auth(token),
        ActionAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        ActionAuth::Oauth2 {
            token_url,
            client_id,
            client_secret,
            scope,
        } => {
            let token = platform
                .actions
                .tokens
                .token(
                    &platform.actions.http,
                    token_url,
                    client_id,
                    client_secret,
                    scope.as_deref(),
                )
                .await
                .map_err(|e| e.to_string())?;
            request.bearer_auth(token)
        }
        ActionAuth::Custom { headers } => {
            let mut req = request;
            for (name, value) in headers {
                req = req.header(name, value);
            }
            req
        }
    };

    let response = request
        .send()
        .await
        .map_err(|e| format!("runbook webhook failed: {e}"))?;
    let status = response.status();
    let body = truncate_body(&response.text().await.unwrap_or_default());

    if status.is_success() {
        Ok((status.as_u16() as i64, body))
    } else {
        Err(format!("runbook webhook returned {}: {body}", status.as_u16()))
    }
}

/// Validate caller parameters against the flat schema: required presence,
/// scalar types, enum membership; defaults fill the gaps.
fn check_parameters(schema: &Value, provided: &Value) -> Result<Value> {
    let schema = match schema.as_object() {
        Some(schema) if !schema.is_empty() => schema,
        _ => return Ok(provided.clone()),
    };
    let provided = match provided {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        _ => {
            return Err(ApiError::ValidationFailed(vec![
                "parameters must be an object".to_string(),
            ]))
        }
    };

    let mut errors = Vec::new();
    let mut checked = Map::new();

    for (name, spec) in schema {
        let expected = spec.get("type").and_then(|t| t.as_str()).unwrap_or("string");
        let value = provided
            .get(name)
            .cloned()
            .or_else(|| spec.get("default").cloned());

        let Some(value) = value else {
            if spec.get("required").and_then(|r| r.as_bool()).unwrap_or(false) {
                errors.push(format!("parameter {name} is required"));
            }
            continue;
        };

        let type_ok = match expected {
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            _ => value.is_string(),
        };
        if !type_ok {
            errors.push(format!("parameter {name} must be a {expected}"));
            continue;
        }
        if let Some(allowed) = spec.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(&value) {
                errors.push(format!("parameter {name} is not one of the allowed values"));
                continue;
            }
        }
        checked.insert(name.clone(), value);
    }

    for name in provided.keys() {
        if !schema.contains_key(name) {
            errors.push(format!("unknown parameter: {name}"));
        }
    }

    if errors.is_empty() {
        Ok(Value::Object(checked))
    } else {
        Err(ApiError::ValidationFailed(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        json!({
            "host": {"type": "string", "required": true},
            "retries": {"type": "number", "default": 2},
            "dry_run": {"type": "boolean", "default": false},
            "mode": {"type": "string", "enum": ["fast", "safe"], "default": "safe"}
        })
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let checked = check_parameters(&schema(), &json!({"host": "db-1"})).unwrap();
        assert_eq!(checked["retries"], 2);
        assert_eq!(checked["dry_run"], false);
        assert_eq!(checked["mode"], "safe");
    }

    #[test]
    fn missing_required_parameter_fails() {
        let err = check_parameters(&schema(), &json!({})).unwrap_err();
        match err {
            ApiError::ValidationFailed(errors) => {
                assert!(errors.iter().any(|e| e.contains("host is required")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn wrong_type_and_unknown_parameter_fail() {
        let err = check_parameters(
            &schema(),
            &json!({"host": "db-1", "retries": "two", "extra": 1}),
        )
        .unwrap_err();
        match err {
            ApiError::ValidationFailed(errors) => {
                assert!(errors.iter().any(|e| e.contains("must be a number")));
                assert!(errors.iter().any(|e| e.contains("unknown parameter: extra")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn enum_membership_is_enforced() {
        let err =
            check_parameters(&schema(), &json!({"host": "db-1", "mode": "yolo"})).unwrap_err();
        match err {
            ApiError::ValidationFailed(errors) => {
                assert!(errors.iter().any(|e| e.contains("allowed values")));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn empty_schema_passes_parameters_through() {
        let params = json!({"anything": "goes"});
        assert_eq!(check_parameters(&json!({}), &params).unwrap(), params);
    }
}

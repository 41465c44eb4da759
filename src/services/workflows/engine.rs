//! Workflow DAG execution
//!
//! Nodes run one at a time in topological order. Progress is persisted
//! after every node so a crashed worker leaves an inspectable RUNNING row;
//! resume is manual. The first node failure stops the execution.

use super::definition::{NodeDef, NodeKind, WorkflowDefinition};
use crate::actions::template::get_nested_value;
use crate::actions::{ActionError, TicketRef};
use crate::error::Result;
use crate::services::runbooks;
use crate::storage::{now_rfc3339, StorageEngine, WorkflowExecutionRecord, WorkflowRecord};
use crate::Platform;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Hard cap on a single action attempt
const ACTION_CAP: Duration = Duration::from_secs(30);
/// Margin kept from the workflow deadline when truncating delays
const DELAY_SAFETY_MARGIN: Duration = Duration::from_secs(1);

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1000;

/// Outcome of one node, appended to the execution's `completed_nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: String,
    pub completed_at: String,
}

impl NodeResult {
    fn completed(node_id: &str, result: Option<Value>, started_at: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: "completed".to_string(),
            result,
            error: None,
            started_at,
            completed_at: now_rfc3339(),
        }
    }

    fn failed(node_id: &str, error: String, started_at: String) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: "failed".to_string(),
            result: None,
            error: Some(error),
            started_at,
            completed_at: now_rfc3339(),
        }
    }

    fn skipped(node_id: &str) -> Self {
        let now = now_rfc3339();
        Self {
            node_id: node_id.to_string(),
            status: "skipped".to_string(),
            result: None,
            error: None,
            started_at: now.clone(),
            completed_at: now,
        }
    }
}

/// Snapshot the definition and persist a PENDING execution, then run it on
/// its own task. Later edits to the workflow do not touch this execution.
pub async fn enqueue(
    platform: &Arc<Platform>,
    workflow: &WorkflowRecord,
    incident_id: Option<&str>,
) -> Result<WorkflowExecutionRecord> {
    let execution = WorkflowExecutionRecord {
        id: uuid::Uuid::new_v4().to_string(),
        workflow_id: workflow.id.clone(),
        incident_id: incident_id.map(|s| s.to_string()),
        definition: workflow.definition.clone(),
        status: "PENDING".to_string(),
        current_node_id: None,
        completed_nodes: "[]".to_string(),
        error: None,
        started_at: None,
        completed_at: None,
        failed_at: None,
        created_at: now_rfc3339(),
    };
    platform.storage.create_workflow_execution(&execution)?;
    info!(
        workflow_id = %workflow.id,
        execution_id = %execution.id,
        incident_id = incident_id.unwrap_or("-"),
        "workflow execution enqueued"
    );

    let platform = platform.clone();
    let execution_id = execution.id.clone();
    tokio::spawn(async move {
        run(platform, execution_id).await;
    });

    Ok(execution)
}

/// Drive one execution to a terminal status.
pub async fn run(platform: Arc<Platform>, execution_id: String) {
    if let Err(e) = run_inner(&platform, &execution_id).await {
        error!(execution_id, "workflow execution errored: {e}");
        let _ = platform.storage.finalize_execution(
            &execution_id,
            "FAILED",
            Some(&e.to_string()),
            "[]",
        );
    }
}

async fn run_inner(platform: &Arc<Platform>, execution_id: &str) -> Result<()> {
    let execution = platform.storage.get_workflow_execution(execution_id)?;
    let definition = match WorkflowDefinition::from_json(&execution.definition) {
        Ok(def) => def,
        Err(e) => {
            platform
                .storage
                .finalize_execution(execution_id, "FAILED", Some(&e), "[]")?;
            return Ok(());
        }
    };

    let Some(order) = definition.topological_order() else {
        platform.storage.finalize_execution(
            execution_id,
            "FAILED",
            Some("workflow graph contains a cycle"),
            "[]",
        )?;
        return Ok(());
    };

    platform.storage.mark_execution_started(execution_id)?;
    let started = Instant::now();
    let deadline = Duration::from_secs(definition.settings.timeout.as_secs());
    let context = build_context(
        &platform.storage,
        execution.incident_id.as_deref(),
        &execution.workflow_id,
    );

    let mut results: Vec<NodeResult> = Vec::with_capacity(order.len());
    let mut completed: HashSet<&str> = HashSet::new();
    let mut branch_taken: HashMap<&str, String> = HashMap::new();

    for node in order {
        // Cooperative timeout check between nodes.
        if started.elapsed() >= deadline {
            let serialized = serialize_results(&results);
            platform.storage.finalize_execution(
                execution_id,
                "CANCELLED",
                Some("Workflow timeout exceeded"),
                &serialized,
            )?;
            warn!(execution_id, "workflow cancelled on timeout");
            return Ok(());
        }

        if !is_active(&definition, node, &completed, &branch_taken) {
            results.push(NodeResult::skipped(&node.id));
            platform.storage.update_execution_progress(
                execution_id,
                &node.id,
                &serialize_results(&results),
            )?;
            continue;
        }

        platform.storage.update_execution_progress(
            execution_id,
            &node.id,
            &serialize_results(&results),
        )?;

        let node_started = now_rfc3339();
        let outcome = match node.kind {
            NodeKind::Trigger => Ok(None),
            NodeKind::Condition => {
                let branch = evaluate_condition(node, &context);
                branch_taken.insert(node.id.as_str(), branch.clone());
                Ok(Some(json!({ "branch": branch })))
            }
            NodeKind::Delay => {
                run_delay(node, started, deadline).await;
                Ok(Some(json!({ "delayed": true })))
            }
            NodeKind::Action => {
                run_action(platform, node, &context, &execution, started, deadline)
                    .await
                    .map(Some)
            }
        };

        match outcome {
            Ok(result) => {
                completed.insert(node.id.as_str());
                results.push(NodeResult::completed(&node.id, result, node_started));
                platform.storage.update_execution_progress(
                    execution_id,
                    &node.id,
                    &serialize_results(&results),
                )?;
            }
            Err(message) => {
                // Stop on first error. Budget exhaustion mid-action is a
                // cancellation, everything else a failure.
                let status = if message == "Workflow timeout exceeded" {
                    "CANCELLED"
                } else {
                    "FAILED"
                };
                results.push(NodeResult::failed(&node.id, message.clone(), node_started));
                platform.storage.finalize_execution(
                    execution_id,
                    status,
                    Some(&message),
                    &serialize_results(&results),
                )?;
                warn!(execution_id, node_id = %node.id, status, "workflow stopped: {message}");
                return Ok(());
            }
        }
    }

    platform.storage.finalize_execution(
        execution_id,
        "COMPLETED",
        None,
        &serialize_results(&results),
    )?;
    info!(execution_id, "workflow completed");
    Ok(())
}

/// A node runs when it is the trigger or a taken edge reaches it from a
/// completed node. Nodes hanging off the untaken branch of a condition are
/// skipped, transitively.
fn is_active(
    definition: &WorkflowDefinition,
    node: &NodeDef,
    completed: &HashSet<&str>,
    branch_taken: &HashMap<&str, String>,
) -> bool {
    if node.kind == NodeKind::Trigger {
        return true;
    }
    definition.edges.iter().any(|edge| {
        edge.target == node.id
            && completed.contains(edge.source.as_str())
            && match &edge.branch {
                None => true,
                Some(branch) => branch_taken.get(edge.source.as_str()) == Some(branch),
            }
    })
}

/// Equality comparison of a context path against the configured value.
fn evaluate_condition(node: &NodeDef, context: &Value) -> String {
    let field = node.config.get("field").and_then(|v| v.as_str()).unwrap_or("");
    let expected = node.config.get("value").cloned().unwrap_or(Value::Null);
    let actual = get_nested_value(context, field);

    let matched = match actual {
        Some(actual) => {
            if let (Some(a), Some(e)) = (actual.as_str(), expected.as_str()) {
                a == e
            } else {
                *actual == expected
            }
        }
        None => false,
    };
    debug!(field, matched, "condition evaluated");
    if matched { "true".into() } else { "false".into() }
}

/// Sleep for the configured minutes, truncated to the remaining workflow
/// budget minus a safety margin.
async fn run_delay(node: &NodeDef, started: Instant, deadline: Duration) {
    let minutes = node
        .config
        .get("duration_minutes")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let wanted = Duration::from_secs(minutes * 60);
    let remaining = deadline
        .saturating_sub(started.elapsed())
        .saturating_sub(DELAY_SAFETY_MARGIN);
    let actual = wanted.min(remaining);
    if actual < wanted {
        debug!(node_id = %node.id, "delay truncated to remaining workflow budget");
    }
    tokio::time::sleep(actual).await;
}

/// Execute an action node with its per-node retry policy. Only retryable
/// failures (5xx, network, timeout) consume extra attempts.
async fn run_action(
    platform: &Arc<Platform>,
    node: &NodeDef,
    context: &Value,
    execution: &WorkflowExecutionRecord,
    started: Instant,
    deadline: Duration,
) -> std::result::Result<Value, String> {
    let kind = node
        .config
        .get("kind")
        .and_then(|v| v.as_str())
        .unwrap_or("webhook")
        .to_string();
    let attempts = node
        .config
        .get("retry_attempts")
        .and_then(|v| v.as_u64())
        .map(|n| n as u32)
        .unwrap_or(DEFAULT_RETRY_ATTEMPTS)
        .max(1);
    let mut backoff = Duration::from_millis(
        node.config
            .get("retry_initial_delay_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_RETRY_INITIAL_DELAY_MS),
    );

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining <= DELAY_SAFETY_MARGIN {
            return Err("Workflow timeout exceeded".to_string());
        }
        let cap = ACTION_CAP.min(remaining.mul_f64(0.8));

        let result = if kind == "runbook" {
            run_runbook_action(platform, node, context, execution).await
        } else {
            match platform
                .actions
                .execute(&kind, &node.config, context, cap)
                .await
            {
                Ok(outcome) => {
                    if let (Some(ticket), Some(incident_id)) =
                        (outcome.ticket, execution.incident_id.as_deref())
                    {
                        append_ticket(&platform.storage, incident_id, &ticket);
                    }
                    Ok(outcome.result)
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = e.to_string();
                if e.is_retryable() && attempt < attempts {
                    debug!(
                        node_id = %node.id,
                        attempt,
                        "action attempt failed, retrying: {last_error}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                } else {
                    return Err(last_error);
                }
            }
        }
    }
    Err(last_error)
}

/// Runbook action nodes hand off to the runbook executor; its own execution
/// row carries the result. Failures are final here, the runbook executor
/// does not retry.
async fn run_runbook_action(
    platform: &Arc<Platform>,
    node: &NodeDef,
    context: &Value,
    execution: &WorkflowExecutionRecord,
) -> std::result::Result<Value, ActionError> {
    let runbook_id = node
        .config
        .get("runbook_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ActionError::Fatal("runbook action is missing runbook_id".into()))?;
    let parameters = node
        .config
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let parameters = crate::actions::template::interpolate_value(&parameters, context);

    let record = runbooks::executor::execute_by_id(
        platform,
        runbook_id,
        &parameters,
        "workflow",
        execution.incident_id.as_deref(),
    )
    .await
    .map_err(|e| ActionError::Fatal(e.to_string()))?;

    if record.status == "SUCCESS" {
        Ok(json!({
            "runbook_execution_id": record.id,
            "status_code": record.status_code,
        }))
    } else {
        Err(ActionError::Fatal(
            record.error.unwrap_or_else(|| "runbook execution failed".into()),
        ))
    }
}

/// Append a created ticket to the incident's first alert metadata.
fn append_ticket(storage: &StorageEngine, incident_id: &str, ticket: &TicketRef) {
    let result = (|| -> Result<()> {
        if let Some(alert) = storage.first_alert_for_incident(incident_id)? {
            let mut metadata: Value =
                serde_json::from_str(&alert.metadata).unwrap_or_else(|_| json!({}));
            if !metadata.is_object() {
                metadata = json!({});
            }
            let tickets = metadata
                .as_object_mut()
                .expect("metadata coerced to object")
                .entry("tickets")
                .or_insert_with(|| json!([]));
            if let Some(list) = tickets.as_array_mut() {
                list.push(serde_json::to_value(ticket)?);
            }
            storage.update_alert_metadata(&alert.id, &metadata.to_string())?;
        }
        Ok(())
    })();
    if let Err(e) = result {
        warn!(incident_id, "failed to append ticket reference: {e}");
    }
}

/// Template context frozen at execution start: incident, assignee, team and
/// workflow fields.
pub fn build_context(
    storage: &StorageEngine,
    incident_id: Option<&str>,
    workflow_id: &str,
) -> Value {
    let record = incident_id.and_then(|id| storage.get_incident(id).ok());

    let incident = record
        .as_ref()
        .map(|incident| {
            json!({
                "id": incident.id,
                "title": incident.title,
                "severity": incident.severity,
                "status": incident.status,
                "fingerprint": incident.fingerprint,
                "current_level": incident.current_level,
                "alert_count": incident.alert_count,
                "team_id": incident.team_id,
                "created_at": incident.created_at,
            })
        })
        .unwrap_or(Value::Null);

    let assignee = record
        .as_ref()
        .and_then(|i| i.assigned_user_id.as_deref())
        .map(|id| json!({ "id": id }))
        .unwrap_or(Value::Null);

    let team = record
        .as_ref()
        .and_then(|i| i.team_id.as_deref())
        .map(|id| json!({ "id": id }))
        .unwrap_or(Value::Null);

    let workflow = storage
        .get_workflow(workflow_id)
        .map(|wf| json!({ "id": wf.id, "name": wf.name, "version": wf.version }))
        .unwrap_or(Value::Null);

    json!({
        "incident": incident,
        "assignee": assignee,
        "team": team,
        "workflow": workflow,
    })
}

fn serialize_results(results: &[NodeResult]) -> String {
    serde_json::to_string(results).unwrap_or_else(|_| "[]".to_string())
}

//! Trigger events and workflow matching
//!
//! The pipeline emits a TriggerEvent at each notable point; every enabled
//! workflow whose trigger configuration matches gets an execution enqueued
//! with a snapshot of its current definition. Manual runs bypass condition
//! evaluation entirely and go through the service layer instead.

use super::definition::{TriggerConfig, TriggerKind, WorkflowDefinition};
use super::engine;
use crate::actions::template::get_nested_value;
use crate::storage::WorkflowRecord;
use crate::Platform;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Internal signal driving workflow matching
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    IncidentCreated {
        incident_id: String,
    },
    StateChanged {
        incident_id: String,
        from: String,
        to: String,
    },
    Escalation {
        incident_id: String,
        level: i64,
    },
    Age {
        incident_id: String,
        age_minutes: i64,
    },
}

impl TriggerEvent {
    pub fn incident_id(&self) -> &str {
        match self {
            Self::IncidentCreated { incident_id }
            | Self::StateChanged { incident_id, .. }
            | Self::Escalation { incident_id, .. }
            | Self::Age { incident_id, .. } => incident_id,
        }
    }

    fn kind(&self) -> TriggerKind {
        match self {
            Self::IncidentCreated { .. } => TriggerKind::IncidentCreated,
            Self::StateChanged { .. } => TriggerKind::StateChanged,
            Self::Escalation { .. } => TriggerKind::Escalation,
            Self::Age { .. } => TriggerKind::Age,
        }
    }
}

/// Match the event against every enabled workflow and enqueue executions.
pub async fn dispatch(platform: &Arc<Platform>, event: TriggerEvent) {
    let workflows = match platform.storage.list_workflows(false) {
        Ok(workflows) => workflows,
        Err(e) => {
            error!("trigger dispatch could not list workflows: {e}");
            return;
        }
    };
    if workflows.is_empty() {
        return;
    }

    let context = engine::build_context(&platform.storage, Some(event.incident_id()), "");

    for workflow in workflows {
        let definition = match WorkflowDefinition::from_json(&workflow.definition) {
            Ok(def) => def,
            Err(e) => {
                warn!(workflow_id = %workflow.id, "skipping workflow with bad definition: {e}");
                continue;
            }
        };
        if !definition.settings.enabled {
            continue;
        }
        if !matches(&definition.trigger, &event, &context) {
            continue;
        }
        if let Err(e) = enqueue_matched(platform, &workflow, &event).await {
            error!(workflow_id = %workflow.id, "failed to enqueue workflow: {e}");
        }
    }
}

async fn enqueue_matched(
    platform: &Arc<Platform>,
    workflow: &WorkflowRecord,
    event: &TriggerEvent,
) -> crate::error::Result<()> {
    // Age sweeps repeat; one execution per (workflow, incident) is enough.
    if matches!(event, TriggerEvent::Age { .. })
        && platform
            .storage
            .has_execution_for(&workflow.id, event.incident_id())?
    {
        return Ok(());
    }
    debug!(workflow_id = %workflow.id, ?event, "trigger matched");
    engine::enqueue(platform, workflow, Some(event.incident_id())).await?;
    Ok(())
}

/// Trigger matching: kind, state transition, age threshold and every
/// equality condition must hold.
fn matches(trigger: &TriggerConfig, event: &TriggerEvent, context: &Value) -> bool {
    if trigger.kind != event.kind() {
        return false;
    }

    if let TriggerEvent::StateChanged { from, to, .. } = event {
        if let Some(want_from) = &trigger.from_status {
            if want_from != from {
                return false;
            }
        }
        if let Some(want_to) = &trigger.to_status {
            if want_to != to {
                return false;
            }
        }
    }

    if let TriggerEvent::Age { age_minutes, .. } = event {
        let threshold = trigger.min_age_minutes.unwrap_or(0);
        if *age_minutes < threshold {
            return false;
        }
    }

    trigger.conditions.iter().all(|(path, expected)| {
        match get_nested_value(context, path) {
            Some(actual) => {
                if let (Some(a), Some(e)) = (actual.as_str(), expected.as_str()) {
                    a == e
                } else {
                    actual == expected
                }
            }
            None => false,
        }
    })
}

/// Periodic sweep emitting age events for OPEN incidents. One execution per
/// (workflow, incident) pair; the dedup happens at enqueue.
pub async fn sweep_age_triggers(platform: &Arc<Platform>) {
    let incidents = match platform.storage.list_incidents(Some("OPEN"), 500) {
        Ok(incidents) => incidents,
        Err(e) => {
            error!("age sweep could not list incidents: {e}");
            return;
        }
    };
    let now = chrono::Utc::now();

    for incident in incidents {
        let Ok(created) = chrono::DateTime::parse_from_rfc3339(&incident.created_at) else {
            continue;
        };
        let age_minutes = now
            .signed_duration_since(created.with_timezone(&chrono::Utc))
            .num_minutes();
        if age_minutes <= 0 {
            continue;
        }
        dispatch(
            platform,
            TriggerEvent::Age {
                incident_id: incident.id,
                age_minutes,
            },
        )
        .await;
    }
}

/// Age sweeper loop, spawned at startup.
pub async fn run_age_sweeper(platform: Arc<Platform>) {
    let interval = std::time::Duration::from_secs(60);
    loop {
        tokio::time::sleep(interval).await;
        sweep_age_triggers(&platform).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn context() -> Value {
        json!({"incident": {"severity": "CRITICAL", "status": "OPEN"}})
    }

    #[test]
    fn kind_must_match() {
        let trigger = TriggerConfig {
            kind: TriggerKind::IncidentCreated,
            ..Default::default()
        };
        let event = TriggerEvent::IncidentCreated {
            incident_id: "inc-1".into(),
        };
        assert!(matches(&trigger, &event, &context()));

        let event = TriggerEvent::Escalation {
            incident_id: "inc-1".into(),
            level: 2,
        };
        assert!(!matches(&trigger, &event, &context()));
    }

    #[test]
    fn equality_conditions_are_anded() {
        let mut conditions = HashMap::new();
        conditions.insert("incident.severity".to_string(), json!("CRITICAL"));
        conditions.insert("incident.status".to_string(), json!("OPEN"));
        let trigger = TriggerConfig {
            kind: TriggerKind::IncidentCreated,
            conditions,
            ..Default::default()
        };
        let event = TriggerEvent::IncidentCreated {
            incident_id: "inc-1".into(),
        };
        assert!(matches(&trigger, &event, &context()));

        let low = json!({"incident": {"severity": "LOW", "status": "OPEN"}});
        assert!(!matches(&trigger, &event, &low));
    }

    #[test]
    fn state_transition_filters_apply() {
        let trigger = TriggerConfig {
            kind: TriggerKind::StateChanged,
            from_status: Some("OPEN".into()),
            to_status: Some("ACKNOWLEDGED".into()),
            ..Default::default()
        };
        let matching = TriggerEvent::StateChanged {
            incident_id: "inc-1".into(),
            from: "OPEN".into(),
            to: "ACKNOWLEDGED".into(),
        };
        let other = TriggerEvent::StateChanged {
            incident_id: "inc-1".into(),
            from: "ACKNOWLEDGED".into(),
            to: "RESOLVED".into(),
        };
        assert!(matches(&trigger, &matching, &context()));
        assert!(!matches(&trigger, &other, &context()));
    }

    #[test]
    fn age_threshold_applies() {
        let trigger = TriggerConfig {
            kind: TriggerKind::Age,
            min_age_minutes: Some(30),
            ..Default::default()
        };
        let young = TriggerEvent::Age {
            incident_id: "inc-1".into(),
            age_minutes: 10,
        };
        let old = TriggerEvent::Age {
            incident_id: "inc-1".into(),
            age_minutes: 45,
        };
        assert!(!matches(&trigger, &young, &context()));
        assert!(matches(&trigger, &old, &context()));
    }
}

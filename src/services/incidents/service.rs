//! Incident grouping and lifecycle

use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::escalations::scheduler;
use crate::services::webhooks::fingerprint::incident_fingerprint;
use crate::services::webhooks::normalize::NormalizedAlert;
use crate::services::workflows::triggers::{self, TriggerEvent};
use crate::services::Actor;
use crate::storage::{now_rfc3339, AlertRecord, IncidentRecord, IntegrationRecord};
use crate::Platform;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Result of routing an alert into the incident layer
pub struct RoutedAlert {
    pub alert: AlertRecord,
    pub incident: IncidentRecord,
    pub grouped: bool,
}

/// Group the normalized alert into an OPEN incident inside the dedup
/// window, or create a fresh incident wired to the team's default
/// escalation policy.
pub fn route_alert(
    platform: &Platform,
    integration: &IntegrationRecord,
    normalized: &NormalizedAlert,
) -> Result<RoutedAlert> {
    let service = normalized
        .service
        .as_deref()
        .or(integration.default_service.as_deref());
    let fingerprint = incident_fingerprint(
        &normalized.title,
        &normalized.source,
        &normalized.severity,
        service,
    );

    let policy_id = match integration.team_id.as_deref() {
        Some(team) => platform
            .storage
            .default_policy_for_team(team)?
            .map(|p| p.id),
        None => None,
    };

    let mut alert = AlertRecord {
        id: uuid::Uuid::new_v4().to_string(),
        title: normalized.title.clone(),
        description: normalized.description.clone(),
        severity: normalized.severity.clone(),
        status: "OPEN".to_string(),
        source: normalized.source.clone(),
        external_id: normalized.external_id.clone(),
        triggered_at: normalized.triggered_at.to_rfc3339(),
        metadata: normalized.metadata.to_string(),
        integration_id: integration.id.clone(),
        incident_id: None,
        created_at: now_rfc3339(),
    };

    let (incident, grouped) = platform.storage.group_or_create_incident(
        &mut alert,
        &fingerprint,
        integration.team_id.as_deref(),
        policy_id.as_deref(),
        integration.dedup_window_minutes,
    )?;

    if grouped {
        info!(
            incident_id = %incident.id,
            alert_id = %alert.id,
            alert_count = incident.alert_count,
            "alert grouped into open incident"
        );
    } else {
        info!(incident_id = %incident.id, alert_id = %alert.id, "incident created");
        scheduler::schedule_initial(platform, &incident)?;
    }

    Ok(RoutedAlert {
        alert,
        incident,
        grouped,
    })
}

/// Acknowledge an OPEN incident: pending escalation timers are cancelled in
/// the same step.
pub async fn acknowledge(
    platform: &Arc<Platform>,
    id: &str,
    actor: &Actor,
) -> Result<IncidentRecord> {
    let current = platform.storage.get_incident(id)?;
    if current.status != "OPEN" {
        return Err(ApiError::InvalidRequest(format!(
            "incident is {}, only OPEN incidents can be acknowledged",
            current.status
        )));
    }
    transition(platform, id, "ACKNOWLEDGED", actor).await
}

/// Resolve an incident. Later alerts with the same fingerprint start a
/// fresh incident.
pub async fn resolve(platform: &Arc<Platform>, id: &str, actor: &Actor) -> Result<IncidentRecord> {
    let current = platform.storage.get_incident(id)?;
    if current.status != "OPEN" && current.status != "ACKNOWLEDGED" {
        return Err(ApiError::InvalidRequest(format!(
            "incident is {}, only OPEN or ACKNOWLEDGED incidents can be resolved",
            current.status
        )));
    }
    transition(platform, id, "RESOLVED", actor).await
}

async fn transition(
    platform: &Arc<Platform>,
    id: &str,
    new_status: &str,
    actor: &Actor,
) -> Result<IncidentRecord> {
    let (incident, old_status) = platform
        .storage
        .transition_incident(id, new_status, actor.id_str())?;

    let cancelled = scheduler::cancel_for_incident(platform, id)?;
    platform
        .storage
        .set_alert_status_for_incident(id, new_status)?;

    info!(
        incident_id = id,
        from = %old_status,
        to = new_status,
        cancelled_timers = cancelled,
        "incident transitioned"
    );
    audit::record(
        &platform.storage,
        &format!("incident.{}", new_status.to_lowercase()),
        actor.id_str(),
        incident.team_id.as_deref(),
        Some("incident"),
        Some(id),
        json!({ "from": old_status, "cancelled_jobs": cancelled }),
        "INFO",
    );

    triggers::dispatch(
        platform,
        TriggerEvent::StateChanged {
            incident_id: id.to_string(),
            from: old_status,
            to: new_status.to_string(),
        },
    )
    .await;

    Ok(incident)
}

pub fn assign(
    platform: &Platform,
    id: &str,
    user_id: Option<&str>,
    actor: &Actor,
) -> Result<IncidentRecord> {
    platform.storage.assign_incident(id, user_id)?;
    let incident = platform.storage.get_incident(id)?;
    audit::record(
        &platform.storage,
        "incident.assigned",
        actor.id_str(),
        incident.team_id.as_deref(),
        Some("incident"),
        Some(id),
        json!({ "assigned_user_id": user_id }),
        "INFO",
    );
    Ok(incident)
}

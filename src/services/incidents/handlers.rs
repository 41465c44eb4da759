use super::service;
use crate::error::{ApiError, Result};
use crate::services::Actor;
use crate::storage::IncidentRecord;
use crate::Platform;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

fn incident_json(incident: &IncidentRecord) -> Value {
    json!({
        "id": incident.id,
        "fingerprint": incident.fingerprint,
        "title": incident.title,
        "severity": incident.severity,
        "status": incident.status,
        "team_id": incident.team_id,
        "assigned_user_id": incident.assigned_user_id,
        "current_level": incident.current_level,
        "escalation_policy_id": incident.escalation_policy_id,
        "alert_count": incident.alert_count,
        "status_history": serde_json::from_str::<Value>(&incident.status_history)
            .unwrap_or_else(|_| json!([])),
        "created_at": incident.created_at,
        "updated_at": incident.updated_at,
        "acknowledged_at": incident.acknowledged_at,
        "resolved_at": incident.resolved_at,
    })
}

pub async fn list(
    State(platform): State<Arc<Platform>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>> {
    let incidents = platform
        .storage
        .list_incidents(query.status.as_deref(), query.limit)?;
    Ok(Json(json!({
        "incidents": incidents.iter().map(incident_json).collect::<Vec<_>>()
    })))
}

pub async fn get(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let incident = platform.storage.get_incident(&id)?;
    Ok(Json(incident_json(&incident)))
}

pub async fn alerts(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    platform.storage.get_incident(&id)?;
    let alerts = platform.storage.alerts_for_incident(&id)?;
    Ok(Json(json!({ "alerts": alerts })))
}

pub async fn acknowledge(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let incident = service::acknowledge(&platform, &id, &actor).await?;
    Ok(Json(incident_json(&incident)))
}

pub async fn resolve(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let incident = service::resolve(&platform, &id, &actor).await?;
    Ok(Json(incident_json(&incident)))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub user_id: Option<String>,
}

pub async fn assign(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let incident = service::assign(&platform, &id, request.user_id.as_deref(), &actor)?;
    Ok(Json(incident_json(&incident)))
}

#[derive(Deserialize)]
pub struct AlertListQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// GET /api/alerts
pub async fn list_alerts(
    State(platform): State<Arc<Platform>>,
    Query(query): Query<AlertListQuery>,
) -> Result<Json<Value>> {
    if let Some(severity) = query.severity.as_deref() {
        if !["CRITICAL", "HIGH", "MEDIUM", "LOW", "INFO"].contains(&severity) {
            return Err(ApiError::ValidationFailed(vec![format!(
                "unknown severity filter: {severity}"
            )]));
        }
    }
    let alerts = platform.storage.list_alerts(
        query.status.as_deref(),
        query.severity.as_deref(),
        query.limit,
    )?;
    Ok(Json(json!({ "alerts": alerts })))
}

/// GET /api/alerts/:id
pub async fn get_alert(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let alert = platform.storage.get_alert(&id)?;
    Ok(Json(serde_json::to_value(alert)?))
}

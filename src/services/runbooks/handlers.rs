use super::executor;
use super::service::{self, RunbookInput};
use crate::error::Result;
use crate::services::Actor;
use crate::Platform;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn create(
    State(platform): State<Arc<Platform>>,
    headers: HeaderMap,
    Json(input): Json<RunbookInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let record = service::create(&platform, &input, &actor)?;
    Ok((StatusCode::CREATED, Json(service::runbook_json(&record))))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub team_id: Option<String>,
}

pub async fn list(
    State(platform): State<Arc<Platform>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>> {
    let runbooks = platform.storage.list_runbooks(query.team_id.as_deref())?;
    Ok(Json(json!({
        "runbooks": runbooks.iter().map(service::runbook_json).collect::<Vec<_>>()
    })))
}

pub async fn get(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let record = platform.storage.get_runbook(&id)?;
    Ok(Json(service::runbook_json(&record)))
}

pub async fn update(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<RunbookInput>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::update(&platform, &id, &input, &actor)?;
    Ok(Json(service::runbook_json(&record)))
}

pub async fn delete(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let actor = Actor::from_headers(&headers);
    service::delete(&platform, &id, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn approve(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::approve(&platform, &id, &actor)?;
    Ok(Json(service::runbook_json(&record)))
}

#[derive(Deserialize)]
pub struct DeprecateRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn deprecate(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<DeprecateRequest>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::deprecate(&platform, &id, &request.reason, &actor)?;
    Ok(Json(service::runbook_json(&record)))
}

pub async fn versions(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    platform.storage.get_runbook(&id)?;
    let versions = platform.storage.list_runbook_versions(&id)?;
    Ok(Json(json!({ "versions": versions })))
}

pub async fn rollback(
    State(platform): State<Arc<Platform>>,
    Path((id, version)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::rollback(&platform, &id, version, &actor)?;
    Ok(Json(service::runbook_json(&record)))
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub incident_id: Option<String>,
}

pub async fn execute(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let execution = executor::execute_by_id(
        &platform,
        &id,
        &request.parameters,
        "manual",
        request.incident_id.as_deref(),
    )
    .await?;
    crate::services::audit::record(
        &platform.storage,
        "runbook.executed_manually",
        actor.id_str(),
        None,
        Some("runbook"),
        Some(&id),
        json!({ "execution_id": execution.id, "status": execution.status }),
        "INFO",
    );
    Ok(Json(serde_json::to_value(execution)?))
}

#[derive(Deserialize)]
pub struct ExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn executions(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Value>> {
    platform.storage.get_runbook(&id)?;
    let executions = platform.storage.list_runbook_executions(&id, query.limit)?;
    Ok(Json(json!({ "executions": executions })))
}

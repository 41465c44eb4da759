use super::service::{self, WorkflowInput};
use super::templates;
use crate::error::Result;
use crate::services::Actor;
use crate::storage::WorkflowRecord;
use crate::Platform;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn workflow_json(record: &WorkflowRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "description": record.description,
        "scope": record.scope,
        "team_id": record.team_id,
        "version": record.version,
        "enabled": record.enabled,
        "definition": serde_json::from_str::<Value>(&record.definition)
            .unwrap_or_else(|_| json!({})),
        "is_template": record.is_template,
        "template_category": record.template_category,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

pub async fn create(
    State(platform): State<Arc<Platform>>,
    headers: HeaderMap,
    Json(input): Json<WorkflowInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let record = service::create(&platform, &input, &actor)?;
    Ok((StatusCode::CREATED, Json(workflow_json(&record))))
}

pub async fn list(State(platform): State<Arc<Platform>>) -> Result<Json<Value>> {
    let workflows = platform.storage.list_workflows(true)?;
    Ok(Json(json!({
        "workflows": workflows.iter().map(workflow_json).collect::<Vec<_>>()
    })))
}

pub async fn get(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let record = platform.storage.get_workflow(&id)?;
    Ok(Json(workflow_json(&record)))
}

pub async fn update(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<WorkflowInput>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::update(&platform, &id, &input, &actor)?;
    Ok(Json(workflow_json(&record)))
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

#[derive(Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

pub async fn toggle(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::toggle(&platform, &id, request.enabled, &actor)?;
    Ok(Json(workflow_json(&record)))
}

pub async fn duplicate(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let record = service::duplicate(&platform, &id, &actor)?;
    Ok((StatusCode::CREATED, Json(workflow_json(&record))))
}

pub async fn export(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(service::export(&platform, &id)?))
}

pub async fn import(
    State(platform): State<Arc<Platform>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let record = service::import(&platform, &payload, &actor)?;
    Ok((StatusCode::CREATED, Json(workflow_json(&record))))
}

pub async fn versions(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    platform.storage.get_workflow(&id)?;
    let versions = platform.storage.list_workflow_versions(&id)?;
    Ok(Json(json!({ "versions": versions })))
}

pub async fn rollback(
    State(platform): State<Arc<Platform>>,
    Path((id, version)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::rollback(&platform, &id, version, &actor)?;
    Ok(Json(workflow_json(&record)))
}

#[derive(Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub incident_id: Option<String>,
}

pub async fn execute(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let execution =
        service::execute_manual(&platform, &id, request.incident_id.as_deref(), &actor).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::to_value(execution)?)))
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
    platform.storage.get_workflow(&id)?;
    let executions = platform.storage.list_workflow_executions(&id, query.limit)?;
    Ok(Json(json!({ "executions": executions })))
}

pub async fn get_execution(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let execution = platform.storage.get_workflow_execution(&id)?;
    Ok(Json(serde_json::to_value(execution)?))
}

pub async fn analytics(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(service::analytics(&platform, &id)?))
}

// ==================== Templates ====================

#[derive(Deserialize)]
pub struct TemplateListQuery {
    pub category: Option<String>,
}

pub async fn list_templates(
    State(platform): State<Arc<Platform>>,
    Query(query): Query<TemplateListQuery>,
) -> Result<Json<Value>> {
    let records = templates::list(&platform, query.category.as_deref())?;
    Ok(Json(json!({
        "templates": records.iter().map(workflow_json).collect::<Vec<_>>()
    })))
}

pub async fn get_template(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let record = templates::get(&platform, &id)?;
    Ok(Json(workflow_json(&record)))
}

#[derive(Deserialize)]
pub struct UseTemplateRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
}

pub async fn use_template(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<UseTemplateRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let record = templates::use_template(
        &platform,
        &id,
        request.name.as_deref(),
        request.team_id.as_deref(),
        &actor,
    )?;
    Ok((StatusCode::CREATED, Json(workflow_json(&record))))
}

#[derive(Deserialize)]
pub struct TemplateInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub definition: Value,
}

pub async fn create_template(
    State(platform): State<Arc<Platform>>,
    headers: HeaderMap,
    Json(input): Json<TemplateInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let record = templates::create_template(
        &platform,
        &input.name,
        &input.description,
        &input.category,
        &input.definition,
        &actor,
    )?;
    Ok((StatusCode::CREATED, Json(workflow_json(&record))))
}

pub async fn update_template(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<TemplateInput>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = templates::update_template(
        &platform,
        &id,
        &input.name,
        &input.description,
        &input.definition,
        &actor,
    )?;
    Ok(Json(workflow_json(&record)))
}

pub async fn delete_template(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let actor = Actor::from_headers(&headers);
    templates::delete_template(&platform, &id, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

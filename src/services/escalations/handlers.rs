use super::service::{self, LevelInput, PolicyInput};
use crate::error::Result;
use crate::services::Actor;
use crate::Platform;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ListQuery {
    pub team_id: Option<String>,
}

pub async fn create(
    State(platform): State<Arc<Platform>>,
    headers: HeaderMap,
    Json(input): Json<PolicyInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let policy = service::create(&platform, &input, &actor)?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn list(
    State(platform): State<Arc<Platform>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>> {
    let policies = platform
        .storage
        .list_escalation_policies(query.team_id.as_deref())?;
    let mut out = Vec::with_capacity(policies.len());
    for policy in policies {
        out.push(service::policy_json(&platform, &policy.id)?);
    }
    Ok(Json(json!({ "policies": out })))
}

pub async fn get(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    Ok(Json(service::policy_json(&platform, &id)?))
}

pub async fn update(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<PolicyInput>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    Ok(Json(service::update(&platform, &id, &input, &actor)?))
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

pub async fn add_level(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<LevelInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let policy = service::add_level(&platform, &id, &input, &actor)?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn update_level(
    State(platform): State<Arc<Platform>>,
    Path((id, number)): Path<(String, i64)>,
    headers: HeaderMap,
    Json(input): Json<LevelInput>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    Ok(Json(service::update_level(
        &platform, &id, number, &input, &actor,
    )?))
}

pub async fn delete_level(
    State(platform): State<Arc<Platform>>,
    Path((id, number)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    Ok(Json(service::delete_level(&platform, &id, number, &actor)?))
}

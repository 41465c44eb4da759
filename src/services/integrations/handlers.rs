use super::service::{self, IntegrationInput};
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
    Json(input): Json<IntegrationInput>,
) -> Result<(StatusCode, Json<Value>)> {
    let actor = Actor::from_headers(&headers);
    let (record, secret) = service::create(&platform, &input, &actor)?;
    let mut body = service::redacted_json(&record);
    // The one and only time the secret is readable.
    body["signing_secret"] = json!(secret);
    Ok((StatusCode::CREATED, Json(body)))
}

pub async fn list(State(platform): State<Arc<Platform>>) -> Result<Json<Value>> {
    let integrations = platform.storage.list_integrations()?;
    Ok(Json(json!({
        "integrations": integrations
            .iter()
            .map(service::redacted_json)
            .collect::<Vec<_>>()
    })))
}

pub async fn get(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let record = platform.storage.get_integration(&id)?;
    Ok(Json(service::redacted_json(&record)))
}

pub async fn update(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(input): Json<IntegrationInput>,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let record = service::update(&platform, &id, &input, &actor)?;
    Ok(Json(service::redacted_json(&record)))
}

pub async fn rotate_secret(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    let actor = Actor::from_headers(&headers);
    let secret = service::rotate_secret(&platform, &id, &actor)?;
    Ok(Json(json!({ "id": id, "signing_secret": secret })))
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
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn deliveries(
    State(platform): State<Arc<Platform>>,
    Path(id): Path<String>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Json<Value>> {
    platform.storage.get_integration(&id)?;
    let deliveries = platform.storage.list_deliveries(&id, query.limit)?;
    Ok(Json(json!({ "deliveries": deliveries })))
}

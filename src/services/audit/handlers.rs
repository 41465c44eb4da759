use crate::error::Result;
use crate::Platform;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub team_id: Option<String>,
    pub severity: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

/// GET /api/audit
pub async fn query(
    State(platform): State<Arc<Platform>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>> {
    let events = platform.storage.query_audit_events(
        query.action.as_deref(),
        query.team_id.as_deref(),
        query.severity.as_deref(),
        query.since.as_deref(),
        query.until.as_deref(),
        query.limit,
    )?;
    Ok(Json(json!({ "events": events })))
}

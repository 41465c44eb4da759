use crate::Platform;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// POST /webhooks/alerts/:integrationName
pub async fn ingest(
    State(platform): State<Arc<Platform>>,
    Path(integration_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    super::service::ingest(&platform, &integration_name, &headers, &body).await
}

/// GET /webhooks/alerts/:integrationName/test
///
/// Unauthenticated liveness probe. Known integrations also get their
/// provider kind and the minimal accepted payload shape back.
pub async fn test(
    State(platform): State<Arc<Platform>>,
    Path(integration_name): Path<String>,
) -> Json<Value> {
    let details = platform
        .storage
        .get_active_integration_by_name(&integration_name)
        .ok()
        .map(|integration| {
            json!({
                "provider": integration.provider,
                "signature_header": integration.signature_header,
                "sample_payload": {
                    "title": "Example alert",
                    "severity": "high",
                    "timestamp": "2025-01-01T00:00:00Z",
                    "source": "host-1",
                },
            })
        });

    Json(json!({
        "status": "ok",
        "integration": integration_name,
        "details": details,
    }))
}

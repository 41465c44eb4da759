//! Inbound webhook pipeline
//!
//! signature check → idempotency check → normalize → group into incident →
//! arm escalation → emit trigger event. Every request that reaches a known
//! integration leaves exactly one delivery row carrying the HTTP status
//! actually returned: the dedup probe reserves the row in the same
//! transaction, so two concurrent submissions of one payload cannot both
//! create an alert.

use super::fingerprint::content_fingerprint;
use super::normalize;
use super::signature;
use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::incidents;
use crate::services::workflows::triggers::{self, TriggerEvent};
use crate::storage::{now_rfc3339, DeliveryRecord, IntegrationRecord};
use crate::Platform;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::warn;

/// Idempotency key headers, first present wins
const IDEMPOTENCY_HEADERS: &[&str] = &[
    "idempotency-key",
    "x-idempotency-key",
    "x-delivery-id",
    "x-request-id",
    "x-github-delivery",
    "x-datadog-delivery-id",
    "x-trace-id",
];

/// Handle one inbound alert webhook.
pub async fn ingest(
    platform: &Arc<Platform>,
    integration_name: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let integration = match platform
        .storage
        .get_active_integration_by_name(integration_name)
    {
        Ok(integration) => integration,
        Err(e) => {
            // No integration, no delivery row to attach to.
            audit::record(
                &platform.storage,
                "webhook.unknown_integration",
                None,
                None,
                Some("integration"),
                Some(integration_name),
                json!({}),
                "WARN",
            );
            return e.into_response();
        }
    };

    let payload: Option<Value> = serde_json::from_slice(body).ok();
    let fingerprint = match &payload {
        Some(payload) => content_fingerprint(payload),
        None => {
            let mut hasher = Sha256::new();
            hasher.update(body);
            hex::encode(hasher.finalize())
        }
    };

    let delivery = DeliveryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        integration_id: integration.id.clone(),
        idempotency_key: extract_idempotency_key(headers),
        content_fingerprint: fingerprint,
        payload: String::from_utf8_lossy(body).into_owned(),
        headers: sanitize_headers(headers),
        http_status: 0,
        error: None,
        alert_id: None,
        processed_at: now_rfc3339(),
    };

    let mut reserved = false;
    let outcome = run_pipeline(platform, &integration, headers, body, payload, &delivery, &mut reserved).await;

    let (http_status, alert_id, error, response) = match outcome {
        Ok((status, body, alert_id)) => (
            status.as_u16() as i64,
            alert_id,
            None,
            (status, Json(body)).into_response(),
        ),
        Err(e) => {
            audit_failure(platform, &integration, &e);
            (
                e.status_code().as_u16() as i64,
                None,
                Some(e.to_string()),
                e.into_response(),
            )
        }
    };

    let persisted = if reserved {
        platform.storage.finalize_delivery(
            &delivery.id,
            http_status,
            error.as_deref(),
            alert_id.as_deref(),
        )
    } else {
        platform.storage.record_delivery(&DeliveryRecord {
            http_status,
            error,
            alert_id,
            ..delivery
        })
    };
    if let Err(e) = persisted {
        warn!(integration_id = %integration.id, "failed to record delivery: {e}");
    }

    response
}

async fn run_pipeline(
    platform: &Arc<Platform>,
    integration: &IntegrationRecord,
    headers: &HeaderMap,
    body: &[u8],
    payload: Option<Value>,
    delivery: &DeliveryRecord,
    reserved: &mut bool,
) -> Result<(StatusCode, Value, Option<String>)> {
    platform
        .rate_limiter
        .check(&integration.id)
        .map_err(|retry_after| ApiError::RateLimited { retry_after })?;

    signature::verify(integration, headers, body)?;

    let payload = payload
        .ok_or_else(|| ApiError::ValidationFailed(vec!["body must be valid JSON".to_string()]))?;

    // Delivery-level dedup doubling as the row reservation.
    match platform
        .storage
        .reserve_delivery_if_new(delivery, integration.dedup_window_minutes)?
    {
        Some(duplicate) => {
            return Ok((
                StatusCode::OK,
                json!({
                    "alert_id": duplicate.existing_alert_id,
                    "status": "duplicate",
                    "idempotent": true,
                }),
                duplicate.existing_alert_id,
            ));
        }
        None => *reserved = true,
    }

    let normalized = normalize::normalize(&integration.provider, &payload)?;
    let routed = incidents::service::route_alert(platform, integration, &normalized)?;

    if !routed.grouped {
        triggers::dispatch(
            platform,
            TriggerEvent::IncidentCreated {
                incident_id: routed.incident.id.clone(),
            },
        )
        .await;
    }

    let alert_id = routed.alert.id.clone();
    Ok((
        StatusCode::CREATED,
        json!({
            "alert_id": routed.alert.id,
            "incident_id": routed.incident.id,
            "status": if routed.grouped { "grouped" } else { "created" },
            "title": routed.alert.title,
            "severity": routed.alert.severity,
            "triggered_at": routed.alert.triggered_at,
        }),
        Some(alert_id),
    ))
}

fn audit_failure(platform: &Arc<Platform>, integration: &IntegrationRecord, error: &ApiError) {
    let (action, severity) = match error {
        ApiError::MissingSignature
        | ApiError::InvalidSignature
        | ApiError::WebhookExpired
        | ApiError::WebhookTimestampFuture => ("webhook.signature_failed", "HIGH"),
        ApiError::ValidationFailed(_) => ("webhook.validation_failed", "WARN"),
        ApiError::RateLimited { .. } => ("webhook.rate_limited", "WARN"),
        _ => ("webhook.processing_failed", "HIGH"),
    };
    audit::record(
        &platform.storage,
        action,
        None,
        integration.team_id.as_deref(),
        Some("integration"),
        Some(&integration.id),
        json!({ "error_type": error.slug() }),
        severity,
    );
}

/// First idempotency header present wins; lookups are case-insensitive by
/// HeaderMap semantics.
fn extract_idempotency_key(headers: &HeaderMap) -> Option<String> {
    IDEMPOTENCY_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    })
}

/// Replace secret-bearing headers before persistence.
fn sanitize_headers(headers: &HeaderMap) -> String {
    static SECRET_PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = SECRET_PATTERN.get_or_init(|| {
        regex::Regex::new(
            r"(?i)^(authorization|cookie|x-webhook-secret|x-api-key|x-.*-token|x-.*-signature)$",
        )
        .expect("static header pattern compiles")
    });

    let mut sanitized = serde_json::Map::new();
    for (name, value) in headers {
        let rendered = if pattern.is_match(name.as_str()) {
            "[REDACTED]".to_string()
        } else {
            value.to_str().unwrap_or("[binary]").to_string()
        };
        sanitized.insert(name.as_str().to_string(), Value::String(rendered));
    }
    Value::Object(sanitized).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_header_priority() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-1".parse().unwrap());
        headers.insert("Idempotency-Key", "key-1".parse().unwrap());
        // The canonical header wins over the later aliases.
        assert_eq!(extract_idempotency_key(&headers).as_deref(), Some("key-1"));

        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Delivery", "gh-1".parse().unwrap());
        assert_eq!(extract_idempotency_key(&headers).as_deref(), Some("gh-1"));
    }

    #[test]
    fn secret_headers_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc".parse().unwrap());
        headers.insert("X-Webhook-Signature", "deadbeef".parse().unwrap());
        headers.insert("X-Vendor-Token", "tok".parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());

        let sanitized: Value = serde_json::from_str(&sanitize_headers(&headers)).unwrap();
        assert_eq!(sanitized["authorization"], "[REDACTED]");
        assert_eq!(sanitized["x-webhook-signature"], "[REDACTED]");
        assert_eq!(sanitized["x-vendor-token"], "[REDACTED]");
        assert_eq!(sanitized["content-type"], "application/json");
    }
}

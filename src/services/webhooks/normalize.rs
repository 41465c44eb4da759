//! Provider payload normalization into the canonical alert shape

use crate::error::{ApiError, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::signature::{from_epoch, parse_timestamp};

/// Canonical alert produced from a provider payload
#[derive(Debug, Clone)]
pub struct NormalizedAlert {
    pub title: String,
    pub description: String,
    pub severity: String,
    pub triggered_at: DateTime<Utc>,
    pub source: String,
    pub service: Option<String>,
    pub external_id: Option<String>,
    pub metadata: Value,
}

/// Map a provider payload to the canonical alert. Unknown provider kinds
/// fall back to the generic schema.
pub fn normalize(provider: &str, payload: &Value) -> Result<NormalizedAlert> {
    match provider {
        "datadog" => normalize_datadog(payload),
        "newrelic" => normalize_newrelic(payload),
        "pagerduty" => normalize_pagerduty(payload),
        _ => normalize_generic(payload),
    }
}

/// Canonical severity from provider aliases, case-insensitive.
pub fn canonical_severity(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "p1" | "emergency" | "critical" => Some("CRITICAL"),
        "p2" | "error" | "high" => Some("HIGH"),
        "p3" | "warning" | "medium" | "warn" => Some("MEDIUM"),
        "p4" | "low" => Some("LOW"),
        "info" | "informational" => Some("INFO"),
        _ => None,
    }
}

fn normalize_generic(payload: &Value) -> Result<NormalizedAlert> {
    let mut errors = Vec::new();

    let title = str_field(payload, "title");
    if title.as_deref().unwrap_or("").trim().is_empty() {
        errors.push("title is required and must be non-empty".to_string());
    }

    let severity = match str_field(payload, "severity") {
        Some(raw) => match canonical_severity(&raw) {
            Some(sev) => Some(sev.to_string()),
            None => {
                errors.push(format!("unknown severity: {raw}"));
                None
            }
        },
        None => {
            errors.push("severity is required".to_string());
            None
        }
    };

    let triggered_at = match event_timestamp(payload, &["timestamp", "triggered_at"]) {
        Some(ts) => Some(ts),
        None => {
            errors.push("timestamp is required (ISO-8601 or Unix epoch)".to_string());
            None
        }
    };

    if !errors.is_empty() {
        return Err(ApiError::ValidationFailed(errors));
    }

    Ok(NormalizedAlert {
        title: title.unwrap_or_default().trim().to_string(),
        description: str_field(payload, "description")
            .or_else(|| str_field(payload, "message"))
            .unwrap_or_default(),
        severity: severity.unwrap_or_else(|| "INFO".to_string()),
        triggered_at: triggered_at.unwrap_or_else(Utc::now),
        source: str_field(payload, "source")
            .or_else(|| str_field(payload, "host"))
            .unwrap_or_default(),
        service: str_field(payload, "service"),
        external_id: external_id(payload),
        metadata: metadata_of(payload),
    })
}

fn normalize_datadog(payload: &Value) -> Result<NormalizedAlert> {
    let mut errors = Vec::new();

    let title = str_field(payload, "title").or_else(|| str_field(payload, "event_title"));
    if title.as_deref().unwrap_or("").trim().is_empty() {
        errors.push("title is required".to_string());
    }

    // Datadog sends alert_type (error/warning/info) or a priority (P1..P4).
    let raw_severity = str_field(payload, "severity")
        .or_else(|| str_field(payload, "priority"))
        .or_else(|| str_field(payload, "alert_type"));
    let severity = raw_severity
        .as_deref()
        .and_then(canonical_severity)
        .map(|s| s.to_string());
    if severity.is_none() {
        errors.push(format!(
            "unknown severity: {}",
            raw_severity.unwrap_or_default()
        ));
    }

    let triggered_at = event_timestamp(payload, &["timestamp", "date_happened", "last_updated"]);
    if triggered_at.is_none() {
        errors.push("timestamp is required".to_string());
    }

    if !errors.is_empty() {
        return Err(ApiError::ValidationFailed(errors));
    }

    Ok(NormalizedAlert {
        title: title.unwrap_or_default().trim().to_string(),
        description: str_field(payload, "text")
            .or_else(|| str_field(payload, "body"))
            .or_else(|| str_field(payload, "description"))
            .unwrap_or_default(),
        severity: severity.unwrap_or_else(|| "INFO".to_string()),
        triggered_at: triggered_at.unwrap_or_else(Utc::now),
        source: str_field(payload, "host")
            .or_else(|| str_field(payload, "source"))
            .unwrap_or_else(|| "datadog".to_string()),
        service: str_field(payload, "service"),
        external_id: str_field(payload, "aggregation_key").or_else(|| external_id(payload)),
        metadata: metadata_of(payload),
    })
}

fn normalize_newrelic(payload: &Value) -> Result<NormalizedAlert> {
    let mut errors = Vec::new();

    let title = str_field(payload, "condition_name")
        .or_else(|| str_field(payload, "title"))
        .or_else(|| str_field(payload, "incident_title"));
    if title.as_deref().unwrap_or("").trim().is_empty() {
        errors.push("condition_name or title is required".to_string());
    }

    let raw_severity = str_field(payload, "severity").or_else(|| str_field(payload, "priority"));
    let severity = raw_severity
        .as_deref()
        .and_then(canonical_severity)
        .map(|s| s.to_string());
    if severity.is_none() {
        errors.push(format!(
            "unknown severity: {}",
            raw_severity.unwrap_or_default()
        ));
    }

    let triggered_at = event_timestamp(payload, &["timestamp", "opened_at", "created_at"]);
    if triggered_at.is_none() {
        errors.push("timestamp is required".to_string());
    }

    if !errors.is_empty() {
        return Err(ApiError::ValidationFailed(errors));
    }

    Ok(NormalizedAlert {
        title: title.unwrap_or_default().trim().to_string(),
        description: str_field(payload, "details")
            .or_else(|| str_field(payload, "description"))
            .unwrap_or_default(),
        severity: severity.unwrap_or_else(|| "INFO".to_string()),
        triggered_at: triggered_at.unwrap_or_else(Utc::now),
        source: str_field(payload, "targets")
            .or_else(|| str_field(payload, "source"))
            .unwrap_or_else(|| "newrelic".to_string()),
        service: str_field(payload, "service"),
        external_id: str_field(payload, "incident_id").or_else(|| external_id(payload)),
        metadata: metadata_of(payload),
    })
}

fn normalize_pagerduty(payload: &Value) -> Result<NormalizedAlert> {
    let mut errors = Vec::new();

    let title = str_field(payload, "summary").or_else(|| str_field(payload, "title"));
    if title.as_deref().unwrap_or("").trim().is_empty() {
        errors.push("summary is required".to_string());
    }

    let raw_severity = str_field(payload, "severity");
    let severity = raw_severity
        .as_deref()
        .and_then(canonical_severity)
        .map(|s| s.to_string());
    if severity.is_none() {
        errors.push(format!(
            "unknown severity: {}",
            raw_severity.unwrap_or_default()
        ));
    }

    let triggered_at = event_timestamp(payload, &["timestamp", "occurred_at", "created_at"]);
    if triggered_at.is_none() {
        errors.push("timestamp is required".to_string());
    }

    if !errors.is_empty() {
        return Err(ApiError::ValidationFailed(errors));
    }

    Ok(NormalizedAlert {
        title: title.unwrap_or_default().trim().to_string(),
        description: str_field(payload, "description").unwrap_or_default(),
        severity: severity.unwrap_or_else(|| "INFO".to_string()),
        triggered_at: triggered_at.unwrap_or_else(Utc::now),
        source: str_field(payload, "source").unwrap_or_else(|| "pagerduty".to_string()),
        service: str_field(payload, "service").or_else(|| str_field(payload, "component")),
        external_id: str_field(payload, "dedup_key").or_else(|| external_id(payload)),
        metadata: metadata_of(payload),
    })
}

fn str_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn external_id(payload: &Value) -> Option<String> {
    for key in ["external_id", "externalId", "id", "alert_id"] {
        match payload.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn event_timestamp(payload: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    for key in keys {
        match payload.get(*key) {
            Some(Value::String(s)) => {
                if let Some(ts) = parse_timestamp(s) {
                    return Some(ts);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(ts) = n.as_f64().and_then(from_epoch) {
                    return Some(ts);
                }
            }
            _ => {}
        }
    }
    None
}

fn metadata_of(payload: &Value) -> Value {
    match payload.get("metadata") {
        Some(Value::Object(obj)) => Value::Object(obj.clone()),
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_maps_severity_aliases() {
        for (raw, expected) in [
            ("p1", "CRITICAL"),
            ("Emergency", "CRITICAL"),
            ("error", "HIGH"),
            ("WARN", "MEDIUM"),
            ("p4", "LOW"),
            ("informational", "INFO"),
        ] {
            let payload = json!({
                "title": "t", "severity": raw, "timestamp": "2025-01-10T00:00:00Z"
            });
            let alert = normalize("generic", &payload).unwrap();
            assert_eq!(alert.severity, expected, "alias {raw}");
        }
    }

    #[test]
    fn generic_rejects_missing_required_fields() {
        let err = normalize("generic", &json!({"description": "no title"})).unwrap_err();
        match err {
            ApiError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 3);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn generic_accepts_unix_seconds_and_millis() {
        let a = normalize(
            "generic",
            &json!({"title": "t", "severity": "high", "timestamp": 1736467200}),
        )
        .unwrap();
        let b = normalize(
            "generic",
            &json!({"title": "t", "severity": "high", "timestamp": 1736467200000i64}),
        )
        .unwrap();
        assert_eq!(a.triggered_at, b.triggered_at);
    }

    #[test]
    fn unknown_provider_falls_back_to_generic() {
        let payload = json!({
            "title": "t", "severity": "low", "timestamp": "2025-01-10T00:00:00Z"
        });
        let alert = normalize("unheard-of", &payload).unwrap();
        assert_eq!(alert.severity, "LOW");
    }

    #[test]
    fn datadog_uses_alert_type_and_host() {
        let payload = json!({
            "title": "CPU spike",
            "text": "CPU above 95%",
            "alert_type": "error",
            "date_happened": 1736467200,
            "host": "web-3",
            "aggregation_key": "agg-9"
        });
        let alert = normalize("datadog", &payload).unwrap();
        assert_eq!(alert.severity, "HIGH");
        assert_eq!(alert.source, "web-3");
        assert_eq!(alert.external_id.as_deref(), Some("agg-9"));
    }

    #[test]
    fn pagerduty_uses_summary_and_dedup_key() {
        let payload = json!({
            "summary": "DB down",
            "severity": "critical",
            "occurred_at": "2025-01-10T00:00:00Z",
            "source": "db-1",
            "dedup_key": "dk-1"
        });
        let alert = normalize("pagerduty", &payload).unwrap();
        assert_eq!(alert.title, "DB down");
        assert_eq!(alert.external_id.as_deref(), Some("dk-1"));
    }
}

//! Content fingerprinting for delivery- and incident-level deduplication

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::signature::{from_epoch, parse_timestamp};

/// Fields folded into one canonical `external_id`
const EXTERNAL_ID_ALIASES: &[&str] = &["external_id", "externalId", "id", "alert_id"];

/// Fields folded into one canonical `timestamp`
const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "triggered_at", "event_time", "occurred_at"];

/// Free-text fields hashed when they exceed the length cap
const TEXT_FIELDS: &[&str] = &["description", "message"];

/// Case-folded identity fields
const IDENTITY_FIELDS: &[&str] = &["title", "severity", "source", "host", "service"];

const TEXT_HASH_THRESHOLD: usize = 100;

/// SHA-256 hex of the normalized payload view. Two payloads that differ only
/// in casing, field aliasing, timestamp encoding or long-text noise produce
/// the same fingerprint.
pub fn content_fingerprint(payload: &Value) -> String {
    let normalized = normalize(payload);
    sha256_hex(normalized.to_string().as_bytes())
}

/// Incident-scope fingerprint over the identity tuple. Scoped per team in
/// the dedup query, not in the hash.
pub fn incident_fingerprint(
    title: &str,
    source: &str,
    severity: &str,
    service: Option<&str>,
) -> String {
    let canonical = json!({
        "severity": severity.trim().to_lowercase(),
        "service": service.unwrap_or("").trim().to_lowercase(),
        "source": source.trim().to_lowercase(),
        "title": title.trim().to_lowercase(),
    });
    sha256_hex(canonical.to_string().as_bytes())
}

fn normalize(payload: &Value) -> Value {
    let obj = match payload.as_object() {
        Some(obj) => obj.clone(),
        None => {
            let mut wrapper = Map::new();
            wrapper.insert("payload".to_string(), payload.clone());
            wrapper
        }
    };

    // BTreeMap gives the sorted-key serialization for free.
    let mut out: BTreeMap<String, Value> = BTreeMap::new();

    for (key, value) in &obj {
        if EXTERNAL_ID_ALIASES.contains(&key.as_str())
            || TIMESTAMP_ALIASES.contains(&key.as_str())
            || TEXT_FIELDS.contains(&key.as_str())
        {
            continue;
        }
        if IDENTITY_FIELDS.contains(&key.as_str()) {
            if let Some(s) = value.as_str() {
                out.insert(key.clone(), Value::String(s.trim().to_lowercase()));
                continue;
            }
        }
        if key == "tags" {
            if let Some(tags) = value.as_array() {
                let mut folded: Vec<String> = tags
                    .iter()
                    .filter_map(|t| t.as_str())
                    .map(|t| t.trim().to_lowercase())
                    .collect();
                folded.sort();
                out.insert(key.clone(), json!(folded));
                continue;
            }
        }
        out.insert(key.clone(), value.clone());
    }

    if let Some(id) = first_present(&obj, EXTERNAL_ID_ALIASES) {
        out.insert("external_id".to_string(), canonical_scalar(id));
    }

    if let Some(ts) = first_present(&obj, TIMESTAMP_ALIASES) {
        if let Some(parsed) = canonical_timestamp(ts) {
            out.insert("timestamp".to_string(), Value::String(parsed));
        }
    }

    for field in TEXT_FIELDS {
        if let Some(text) = obj.get(*field).and_then(|v| v.as_str()) {
            let folded = if text.len() > TEXT_HASH_THRESHOLD {
                sha256_hex(text.as_bytes())[..16].to_string()
            } else {
                text.to_lowercase()
            };
            out.insert(field.to_string(), Value::String(folded));
        }
    }

    serde_json::to_value(out).unwrap_or(Value::Null)
}

fn first_present<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| obj.get(*alias))
}

fn canonical_scalar(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => Value::String(other.to_string()),
    }
}

fn canonical_timestamp(value: &Value) -> Option<String> {
    let parsed = match value {
        Value::String(s) => parse_timestamp(s)?,
        Value::Number(n) => from_epoch(n.as_f64()?)?,
        _ => return None,
    };
    Some(parsed.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing_and_whitespace_do_not_change_the_fingerprint() {
        let a = json!({"title": "High CPU", "severity": "critical", "source": "api-1"});
        let b = json!({"title": "  high cpu ", "severity": "CRITICAL", "source": "API-1"});
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
    }

    #[test]
    fn external_id_aliases_collapse() {
        let a = json!({"title": "x", "external_id": "ev-1"});
        let b = json!({"title": "x", "alert_id": "ev-1"});
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
    }

    #[test]
    fn timestamp_units_collapse() {
        let a = json!({"title": "x", "timestamp": 1736467200});
        let b = json!({"title": "x", "occurred_at": 1736467200000i64});
        let c = json!({"title": "x", "event_time": "2025-01-10T00:00:00Z"});
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
        assert_eq!(content_fingerprint(&a), content_fingerprint(&c));
    }

    #[test]
    fn long_description_hashes_short_one_folds() {
        let long = "x".repeat(200);
        let a = json!({"title": "x", "description": long});
        let fingerprint = content_fingerprint(&a);
        // Stable across runs: hashing is deterministic.
        assert_eq!(fingerprint, content_fingerprint(&a));

        let b = json!({"title": "x", "description": "Disk Full"});
        let c = json!({"title": "x", "description": "disk full"});
        assert_eq!(content_fingerprint(&b), content_fingerprint(&c));
    }

    #[test]
    fn tags_are_sorted_and_folded() {
        let a = json!({"title": "x", "tags": ["B", "a"]});
        let b = json!({"title": "x", "tags": ["a", "b"]});
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
    }

    #[test]
    fn incident_fingerprint_ignores_description() {
        let a = incident_fingerprint("High CPU", "api-1", "CRITICAL", None);
        let b = incident_fingerprint("high cpu", "api-1", "critical", None);
        assert_eq!(a, b);
        let c = incident_fingerprint("high cpu", "api-2", "critical", None);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_is_64_hex() {
        let fp = content_fingerprint(&json!({"title": "x"}));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

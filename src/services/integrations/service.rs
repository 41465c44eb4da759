//! Integration management and signing-secret lifecycle

use crate::error::{ApiError, Result};
use crate::services::audit;
use crate::services::Actor;
use crate::storage::{now_rfc3339, IntegrationRecord};
use crate::Platform;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDERS: &[&str] = &["generic", "datadog", "newrelic", "pagerduty"];
const ALGORITHMS: &[&str] = &["sha256", "sha512"];
const FORMATS: &[&str] = &["hex", "base64"];

fn default_signature_header() -> String {
    "x-webhook-signature".to_string()
}

fn default_algorithm() -> String {
    "sha256".to_string()
}

fn default_format() -> String {
    "hex".to_string()
}

fn default_max_age() -> i64 {
    300
}

fn default_window() -> i64 {
    15
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct IntegrationInput {
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default = "default_algorithm")]
    pub signature_algorithm: String,
    #[serde(default = "default_format")]
    pub signature_format: String,
    #[serde(default)]
    pub signature_prefix: Option<String>,
    #[serde(default)]
    pub timestamp_header: Option<String>,
    #[serde(default = "default_max_age")]
    pub timestamp_max_age_secs: i64,
    #[serde(default = "default_window")]
    pub dedup_window_minutes: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub default_service: Option<String>,
}

fn default_provider() -> String {
    "generic".to_string()
}

fn validate(input: &IntegrationInput) -> Result<()> {
    let mut errors = Vec::new();
    if input.name.trim().is_empty() {
        errors.push("name must be non-empty".to_string());
    }
    if !PROVIDERS.contains(&input.provider.as_str()) {
        errors.push(format!("unknown provider: {}", input.provider));
    }
    if !ALGORITHMS.contains(&input.signature_algorithm.as_str()) {
        errors.push(format!("unknown algorithm: {}", input.signature_algorithm));
    }
    if !FORMATS.contains(&input.signature_format.as_str()) {
        errors.push(format!("unknown signature format: {}", input.signature_format));
    }
    if input.timestamp_max_age_secs <= 0 {
        errors.push("timestamp_max_age_secs must be positive".to_string());
    }
    if input.dedup_window_minutes <= 0 {
        errors.push("dedup_window_minutes must be positive".to_string());
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::ValidationFailed(errors))
    }
}

/// 64 hex chars of fresh randomness.
fn generate_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Public view: the secret never leaves as more than an 8-char prefix.
pub fn redacted_json(record: &IntegrationRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "provider": record.provider,
        "team_id": record.team_id,
        "secret_preview": format!("{}…", &record.signing_secret[..8.min(record.signing_secret.len())]),
        "signature_header": record.signature_header,
        "signature_algorithm": record.signature_algorithm,
        "signature_format": record.signature_format,
        "signature_prefix": record.signature_prefix,
        "timestamp_header": record.timestamp_header,
        "timestamp_max_age_secs": record.timestamp_max_age_secs,
        "dedup_window_minutes": record.dedup_window_minutes,
        "active": record.active,
        "default_service": record.default_service,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

/// Create an integration. The generated secret is returned exactly once.
pub fn create(
    platform: &Platform,
    input: &IntegrationInput,
    actor: &Actor,
) -> Result<(IntegrationRecord, String)> {
    validate(input)?;
    let secret = generate_secret();
    let now = now_rfc3339();
    let record = IntegrationRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name: input.name.clone(),
        provider: input.provider.clone(),
        team_id: input.team_id.clone(),
        signing_secret: secret.clone(),
        signature_header: input.signature_header.to_lowercase(),
        signature_algorithm: input.signature_algorithm.clone(),
        signature_format: input.signature_format.clone(),
        signature_prefix: input.signature_prefix.clone(),
        timestamp_header: input.timestamp_header.as_ref().map(|h| h.to_lowercase()),
        timestamp_max_age_secs: input.timestamp_max_age_secs,
        dedup_window_minutes: input.dedup_window_minutes,
        active: input.active,
        default_service: input.default_service.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    platform.storage.create_integration(&record)?;
    audit::record(
        &platform.storage,
        "integration.created",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("integration"),
        Some(&record.id),
        json!({ "name": record.name, "provider": record.provider }),
        "INFO",
    );
    Ok((record, secret))
}

pub fn update(
    platform: &Platform,
    id: &str,
    input: &IntegrationInput,
    actor: &Actor,
) -> Result<IntegrationRecord> {
    validate(input)?;
    let mut record = platform.storage.get_integration(id)?;
    record.name = input.name.clone();
    record.provider = input.provider.clone();
    record.team_id = input.team_id.clone();
    record.signature_header = input.signature_header.to_lowercase();
    record.signature_algorithm = input.signature_algorithm.clone();
    record.signature_format = input.signature_format.clone();
    record.signature_prefix = input.signature_prefix.clone();
    record.timestamp_header = input.timestamp_header.as_ref().map(|h| h.to_lowercase());
    record.timestamp_max_age_secs = input.timestamp_max_age_secs;
    record.dedup_window_minutes = input.dedup_window_minutes;
    record.active = input.active;
    record.default_service = input.default_service.clone();
    platform.storage.update_integration(&record)?;
    audit::record(
        &platform.storage,
        "integration.updated",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("integration"),
        Some(id),
        json!({ "name": record.name }),
        "INFO",
    );
    platform.storage.get_integration(id)
}

/// Replace the signing secret. Outstanding signatures stop verifying; the
/// new secret is returned exactly once.
pub fn rotate_secret(platform: &Platform, id: &str, actor: &Actor) -> Result<String> {
    let record = platform.storage.get_integration(id)?;
    let secret = generate_secret();
    platform.storage.rotate_integration_secret(id, &secret)?;
    audit::record(
        &platform.storage,
        "integration.secret_rotated",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("integration"),
        Some(id),
        json!({}),
        "HIGH",
    );
    Ok(secret)
}

pub fn delete(platform: &Platform, id: &str, actor: &Actor) -> Result<()> {
    let record = platform.storage.get_integration(id)?;
    platform.storage.delete_integration(id)?;
    audit::record(
        &platform.storage,
        "integration.deleted",
        actor.id_str(),
        record.team_id.as_deref(),
        Some("integration"),
        Some(id),
        json!({ "name": record.name }),
        "MEDIUM",
    );
    Ok(())
}

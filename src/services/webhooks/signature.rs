//! Per-integration webhook signature and replay verification

use crate::error::{ApiError, Result};
use crate::storage::IntegrationRecord;
use axum::http::HeaderMap;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

/// Clock skew tolerated for timestamps ahead of the server
const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Verify the request signature and, when configured, the timestamp window.
///
/// Checks run in order: header presence, constant-time HMAC comparison in
/// the integration's algorithm/format, then replay protection. The expected
/// signature is never surfaced in errors or logs.
pub fn verify(integration: &IntegrationRecord, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let provided = headers
        .get(integration.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingSignature)?;

    let provided = match &integration.signature_prefix {
        Some(prefix) => provided.strip_prefix(prefix.as_str()).unwrap_or(provided),
        None => provided,
    };

    verify_mac(integration, provided, body)?;

    if let Some(ts_header) = &integration.timestamp_header {
        let raw = headers
            .get(ts_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::MissingSignature)?;
        check_timestamp(raw, integration.timestamp_max_age_secs)?;
    }

    Ok(())
}

fn verify_mac(integration: &IntegrationRecord, provided: &str, body: &[u8]) -> Result<()> {
    let sig_bytes = decode_signature(&integration.signature_format, provided)?;
    let secret = integration.signing_secret.as_bytes();

    // Mac::verify_slice is constant-time, length mismatch included.
    let ok = match integration.signature_algorithm.as_str() {
        "sha512" => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            mac.update(body);
            mac.verify_slice(&sig_bytes).is_ok()
        }
        _ => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            mac.update(body);
            mac.verify_slice(&sig_bytes).is_ok()
        }
    };

    if ok {
        Ok(())
    } else {
        Err(ApiError::InvalidSignature)
    }
}

fn decode_signature(format: &str, provided: &str) -> Result<Vec<u8>> {
    let decoded = match format {
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(provided.trim())
            .map_err(|_| ApiError::InvalidSignature)?,
        _ => hex::decode(provided.trim()).map_err(|_| ApiError::InvalidSignature)?,
    };
    Ok(decoded)
}

/// Reject timestamps older than the window or further than one minute in
/// the future. Accepts ISO-8601 or Unix epoch; seconds vs milliseconds are
/// told apart by magnitude.
pub fn check_timestamp(raw: &str, max_age_secs: i64) -> Result<()> {
    let ts = parse_timestamp(raw).ok_or_else(|| {
        ApiError::ValidationFailed(vec![format!("unparseable timestamp: {raw}")])
    })?;
    let age = Utc::now().signed_duration_since(ts).num_seconds();

    if age > max_age_secs {
        return Err(ApiError::WebhookExpired);
    }
    if age < -MAX_FUTURE_SKEW_SECS {
        return Err(ApiError::WebhookTimestampFuture);
    }
    Ok(())
}

/// Parse an ISO-8601 or Unix timestamp. Numeric values above 1e12 are
/// treated as milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(num) = raw.parse::<f64>() {
        return from_epoch(num);
    }
    None
}

/// Convert an epoch number to UTC, auto-detecting the unit.
pub fn from_epoch(num: f64) -> Option<DateTime<Utc>> {
    let millis = if num.abs() > 1e12 { num } else { num * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::now_rfc3339;
    use base64::Engine as _;

    fn integration(algorithm: &str, format: &str, prefix: Option<&str>) -> IntegrationRecord {
        IntegrationRecord {
            id: "int-1".into(),
            name: "datadog-prod".into(),
            provider: "datadog".into(),
            team_id: None,
            signing_secret: "super-secret".into(),
            signature_header: "x-webhook-signature".into(),
            signature_algorithm: algorithm.into(),
            signature_format: format.into(),
            signature_prefix: prefix.map(|s| s.into()),
            timestamp_header: None,
            timestamp_max_age_secs: 300,
            dedup_window_minutes: 15,
            active: true,
            default_service: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        }
    }

    fn sign_hex(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_hex_signature() {
        let integration = integration("sha256", "hex", None);
        let body = br#"{"title":"High CPU"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-webhook-signature",
            sign_hex("super-secret", body).parse().unwrap(),
        );
        assert!(verify(&integration, &headers, body).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let integration = integration("sha256", "hex", None);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-webhook-signature",
            sign_hex("super-secret", b"original").parse().unwrap(),
        );
        let err = verify(&integration, &headers, b"tampered").unwrap_err();
        assert!(matches!(err, ApiError::InvalidSignature));
    }

    #[test]
    fn rejects_missing_header() {
        let integration = integration("sha256", "hex", None);
        let err = verify(&integration, &HeaderMap::new(), b"body").unwrap_err();
        assert!(matches!(err, ApiError::MissingSignature));
    }

    #[test]
    fn strips_configured_prefix() {
        let integration = integration("sha256", "hex", Some("sha256="));
        let body = b"payload";
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-webhook-signature",
            format!("sha256={}", sign_hex("super-secret", body))
                .parse()
                .unwrap(),
        );
        assert!(verify(&integration, &headers, body).is_ok());
    }

    #[test]
    fn accepts_base64_sha512() {
        let integration = integration("sha512", "base64", None);
        let body = b"payload";
        let mut mac = Hmac::<Sha512>::new_from_slice(b"super-secret").unwrap();
        mac.update(body);
        let sig = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-signature", sig.parse().unwrap());
        assert!(verify(&integration, &headers, body).is_ok());
    }

    #[test]
    fn expired_timestamp_rejected() {
        let stale = (Utc::now().timestamp() - 400).to_string();
        let err = check_timestamp(&stale, 300).unwrap_err();
        assert!(matches!(err, ApiError::WebhookExpired));
    }

    #[test]
    fn future_timestamp_rejected() {
        let future = (Utc::now().timestamp() + 120).to_string();
        let err = check_timestamp(&future, 300).unwrap_err();
        assert!(matches!(err, ApiError::WebhookTimestampFuture));
    }

    #[test]
    fn recent_timestamp_accepted_in_both_units() {
        let secs = Utc::now().timestamp().to_string();
        let millis = Utc::now().timestamp_millis().to_string();
        assert!(check_timestamp(&secs, 300).is_ok());
        assert!(check_timestamp(&millis, 300).is_ok());
    }
}

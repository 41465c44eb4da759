//! OAuth2 client-credentials token cache
//!
//! Tokens are cached per (token_url, client_id) within this process. The
//! TTL is capped well below the token lifetime so a leaked cache entry goes
//! stale quickly; a 401 from the target invalidates the entry immediately.

use super::ActionError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound on how long a token stays cached
const MAX_TOKEN_TTL: Duration = Duration::from_secs(60);
/// Safety margin subtracted from the provider's expires_in
const EXPIRY_MARGIN: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Per-process token cache. Constructed with the platform and dropped with
/// it; there is no global instance.
#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<(String, String), CachedToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a bearer token, reusing the cached one while it is fresh.
    pub async fn token(
        &self,
        client: &reqwest::Client,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<String, ActionError> {
        let key = (token_url.to_string(), client_id.to_string());

        if let Some(cached) = self.entries.lock().get(&key) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.to_string()),
            ("client_secret", client_secret.to_string()),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope.to_string()));
        }

        let response = client
            .post(token_url)
            .form(&form)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ActionError::Retryable(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                ActionError::Retryable(format!("token endpoint returned {status}"))
            } else {
                ActionError::Fatal(format!("token endpoint returned {status}"))
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ActionError::Fatal(format!("invalid token response: {e}")))?;

        let ttl = body
            .expires_in
            .map(Duration::from_secs)
            .map(|d| d.saturating_sub(EXPIRY_MARGIN))
            .map(|d| d.min(MAX_TOKEN_TTL))
            .unwrap_or(MAX_TOKEN_TTL);

        debug!(token_url, client_id, ttl_secs = ttl.as_secs(), "cached oauth2 token");
        self.entries.lock().insert(
            key,
            CachedToken {
                token: body.access_token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(body.access_token)
    }

    /// Drop a cached token, forcing a refetch on next use. Called when the
    /// target answers 401.
    pub fn invalidate(&self, token_url: &str, client_id: &str) {
        self.entries
            .lock()
            .remove(&(token_url.to_string(), client_id.to_string()));
    }

    /// Clear every entry. Used at shutdown.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn caches_token_until_invalidated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok-1",
                "expires_in": 3600
            })))
            .expect(2)
            .mount(&server)
            .await;

        let cache = TokenCache::new();
        let client = reqwest::Client::new();
        let url = format!("{}/oauth/token", server.uri());

        let first = cache
            .token(&client, &url, "cid", "secret", None)
            .await
            .unwrap();
        let second = cache
            .token(&client, &url, "cid", "secret", None)
            .await
            .unwrap();
        assert_eq!(first, "tok-1");
        assert_eq!(second, "tok-1");

        cache.invalidate(&url, "cid");
        let third = cache
            .token(&client, &url, "cid", "secret", None)
            .await
            .unwrap();
        assert_eq!(third, "tok-1");
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = TokenCache::new();
        let client = reqwest::Client::new();
        let err = cache
            .token(&client, &server.uri(), "cid", "secret", None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

//! Outbound action executors
//!
//! Webhook, Jira and Linear share the HTTP client, the OAuth2 token cache,
//! template interpolation and the retryable/fatal error split. Retry loops
//! live with the callers (workflow engine nodes, escalation scheduler).

pub mod jira;
pub mod linear;
mod oauth;
pub mod template;
pub mod webhook;

pub use oauth::TokenCache;

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Stored response bodies are capped at 1 kB
const MAX_STORED_BODY: usize = 1024;

pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_STORED_BODY {
        body.to_string()
    } else {
        let mut end = MAX_STORED_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

/// Outbound action failure, split by whether a retry can help
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Authentication modes for outbound webhooks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionAuth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Oauth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default)]
        scope: Option<String>,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

/// Ticket created by a Jira or Linear action, appended to the incident's
/// first-alert metadata under `tickets[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRef {
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub id: String,
    pub key: String,
    pub url: String,
    pub created_at: String,
}

/// Result of one action attempt
#[derive(Debug)]
pub struct ActionOutcome {
    pub result: Value,
    pub ticket: Option<TicketRef>,
}

/// Shared executor state: one HTTP client and one token cache per process.
/// Constructed with the platform, torn down with it.
pub struct Dispatcher {
    pub http: reqwest::Client,
    pub tokens: TokenCache,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens: TokenCache::new(),
        }
    }

    /// Execute an action node by kind. The config JSON comes straight from
    /// the workflow definition snapshot.
    pub async fn execute(
        &self,
        kind: &str,
        config: &Value,
        context: &Value,
        timeout: Duration,
    ) -> Result<ActionOutcome, ActionError> {
        match kind {
            "webhook" => {
                let config: webhook::WebhookActionConfig = parse_config(config)?;
                webhook::execute(self, &config, context, timeout).await
            }
            "jira" => {
                let config: jira::JiraActionConfig = parse_config(config)?;
                jira::execute(self, &config, context, timeout).await
            }
            "linear" => {
                let config: linear::LinearActionConfig = parse_config(config)?;
                linear::execute(self, &config, context, timeout).await
            }
            other => Err(ActionError::Fatal(format!("unknown action kind: {other}"))),
        }
    }

    /// Explicit teardown: drop cached credentials.
    pub fn shutdown(&self) {
        self.tokens.clear();
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(config: &Value) -> Result<T, ActionError> {
    serde_json::from_value(config.clone())
        .map_err(|e| ActionError::Fatal(format!("invalid action config: {e}")))
}

impl From<ActionError> for ApiError {
    fn from(e: ActionError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(600);
        let truncated = truncate_body(&long);
        assert!(truncated.len() <= MAX_STORED_BODY);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[test]
    fn auth_modes_deserialize_from_definition_json() {
        let auth: ActionAuth = serde_json::from_value(serde_json::json!({
            "type": "oauth2",
            "token_url": "https://idp/token",
            "client_id": "cid",
            "client_secret": "secret"
        }))
        .unwrap();
        assert!(matches!(auth, ActionAuth::Oauth2 { .. }));

        let auth: ActionAuth = serde_json::from_value(serde_json::json!({"type": "none"})).unwrap();
        assert!(matches!(auth, ActionAuth::None));
    }
}

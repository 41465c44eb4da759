//! Jira Cloud issue creation

use super::template::interpolate;
use super::{truncate_body, ActionError, ActionOutcome, Dispatcher, TicketRef};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

fn default_issue_type() -> String {
    "Task".to_string()
}

/// Jira action node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JiraActionConfig {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct CreatedIssue {
    id: String,
    key: String,
}

pub async fn execute(
    dispatcher: &Dispatcher,
    config: &JiraActionConfig,
    context: &Value,
    timeout: Duration,
) -> Result<ActionOutcome, ActionError> {
    let summary = interpolate(&config.summary, context);
    let description = interpolate(&config.description, context);

    // Jira Cloud v3 wants the description as an ADF document.
    let mut fields = json!({
        "project": { "key": config.project_key },
        "issuetype": { "name": config.issue_type },
        "summary": summary,
        "description": {
            "type": "doc",
            "version": 1,
            "content": [{
                "type": "paragraph",
                "content": [{ "type": "text", "text": description }]
            }]
        }
    });
    if let Some(priority) = &config.priority {
        fields["priority"] = json!({ "name": priority });
    }
    if !config.labels.is_empty() {
        fields["labels"] = json!(config.labels);
    }
    for (key, value) in &config.custom_fields {
        fields[key.as_str()] = value.clone();
    }

    let url = format!("{}/rest/api/3/issue", config.base_url.trim_end_matches('/'));
    let response = dispatcher
        .http
        .post(&url)
        .basic_auth(&config.email, Some(&config.api_token))
        .json(&json!({ "fields": fields }))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ActionError::Retryable(format!("jira timed out: {e}"))
            } else {
                ActionError::Retryable(format!("jira request failed: {e}"))
            }
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        let body = truncate_body(&body);
        return Err(if status.is_server_error() {
            ActionError::Retryable(format!("jira returned {}: {body}", status.as_u16()))
        } else {
            ActionError::Fatal(format!("jira returned {}: {body}", status.as_u16()))
        });
    }

    let issue: CreatedIssue = serde_json::from_str(&body)
        .map_err(|e| ActionError::Fatal(format!("unexpected jira response: {e}")))?;
    let browse_url = format!(
        "{}/browse/{}",
        config.base_url.trim_end_matches('/'),
        issue.key
    );
    debug!(key = %issue.key, "created jira issue");

    let ticket = TicketRef {
        ticket_type: "jira".to_string(),
        id: issue.id.clone(),
        key: issue.key.clone(),
        url: browse_url.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    Ok(ActionOutcome {
        result: json!({
            "status_code": status.as_u16(),
            "issue_id": issue.id,
            "issue_key": issue.key,
            "url": browse_url,
        }),
        ticket: Some(ticket),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn creates_issue_and_reports_ticket() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/issue"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "10001",
                "key": "OPS-42",
                "self": "irrelevant"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let config = JiraActionConfig {
            base_url: server.uri(),
            email: "bot@example.com".into(),
            api_token: "token".into(),
            project_key: "OPS".into(),
            issue_type: "Task".into(),
            summary: "{{incident.title}}".into(),
            description: "severity {{incident.severity}}".into(),
            priority: Some("High".into()),
            labels: vec!["oncall".into()],
            custom_fields: Map::new(),
        };
        let context = json!({"incident": {"title": "DB down", "severity": "CRITICAL"}});

        let outcome = execute(&dispatcher, &config, &context, Duration::from_secs(5))
            .await
            .unwrap();
        let ticket = outcome.ticket.unwrap();
        assert_eq!(ticket.key, "OPS-42");
        assert!(ticket.url.ends_with("/browse/OPS-42"));
    }

    #[tokio::test]
    async fn client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad field"))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let config = JiraActionConfig {
            base_url: server.uri(),
            email: "bot@example.com".into(),
            api_token: "token".into(),
            project_key: "OPS".into(),
            issue_type: "Task".into(),
            summary: "s".into(),
            description: String::new(),
            priority: None,
            labels: vec![],
            custom_fields: Map::new(),
        };
        let err = execute(&dispatcher, &config, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}

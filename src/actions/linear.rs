//! Linear issue creation over GraphQL

use super::template::interpolate;
use super::{truncate_body, ActionError, ActionOutcome, Dispatcher, TicketRef};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const LINEAR_API_URL: &str = "https://api.linear.app/graphql";

const CREATE_ISSUE_MUTATION: &str = "mutation IssueCreate($input: IssueCreateInput!) { \
     issueCreate(input: $input) { success issue { id identifier url } } }";

/// Linear action node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LinearActionConfig {
    pub api_key: String,
    pub team_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<u8>,
    /// Overridable for tests; defaults to the public API
    pub endpoint: Option<String>,
}

pub async fn execute(
    dispatcher: &Dispatcher,
    config: &LinearActionConfig,
    context: &Value,
    timeout: Duration,
) -> Result<ActionOutcome, ActionError> {
    let mut input = json!({
        "teamId": config.team_id,
        "title": interpolate(&config.title, context),
        "description": interpolate(&config.description, context),
    });
    if let Some(priority) = config.priority {
        input["priority"] = json!(priority);
    }

    let endpoint = config.endpoint.as_deref().unwrap_or(LINEAR_API_URL);
    let response = dispatcher
        .http
        .post(endpoint)
        .header("Authorization", &config.api_key)
        .json(&json!({
            "query": CREATE_ISSUE_MUTATION,
            "variables": { "input": input }
        }))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ActionError::Retryable(format!("linear timed out: {e}"))
            } else {
                ActionError::Retryable(format!("linear request failed: {e}"))
            }
        })?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        let body = truncate_body(&body);
        return Err(if status.is_server_error() {
            ActionError::Retryable(format!("linear returned {}: {body}", status.as_u16()))
        } else {
            ActionError::Fatal(format!("linear returned {}: {body}", status.as_u16()))
        });
    }

    let parsed: Value = serde_json::from_str(&body)
        .map_err(|e| ActionError::Fatal(format!("unexpected linear response: {e}")))?;

    // GraphQL reports failures inside a 200 body.
    if let Some(errors) = parsed.get("errors").and_then(|e| e.as_array()) {
        if !errors.is_empty() {
            return Err(ActionError::Fatal(format!(
                "linear rejected the mutation: {}",
                truncate_body(&errors[0].to_string())
            )));
        }
    }

    #[derive(Deserialize)]
    struct Issue {
        id: String,
        identifier: String,
        url: String,
    }
    let issue: Issue =
        serde_json::from_value(parsed["data"]["issueCreate"]["issue"].clone())
            .map_err(|e| ActionError::Fatal(format!("unexpected linear response: {e}")))?;
    debug!(identifier = %issue.identifier, "created linear issue");

    let ticket = TicketRef {
        ticket_type: "linear".to_string(),
        id: issue.id.clone(),
        key: issue.identifier.clone(),
        url: issue.url.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    Ok(ActionOutcome {
        result: json!({
            "status_code": status.as_u16(),
            "issue_id": issue.id,
            "identifier": issue.identifier,
            "url": issue.url,
        }),
        ticket: Some(ticket),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn creates_issue_via_graphql() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "lin_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "issueCreate": {
                        "success": true,
                        "issue": {
                            "id": "uuid-1",
                            "identifier": "ENG-17",
                            "url": "https://linear.app/acme/issue/ENG-17"
                        }
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let config = LinearActionConfig {
            api_key: "lin_api_key".into(),
            team_id: "team-uuid".into(),
            title: "{{incident.title}}".into(),
            description: String::new(),
            priority: Some(1),
            endpoint: Some(server.uri()),
        };
        let outcome = execute(
            &dispatcher,
            &config,
            &json!({"incident": {"title": "API errors"}}),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(outcome.ticket.unwrap().key, "ENG-17");
    }

    #[tokio::test]
    async fn graphql_errors_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"message": "team not found"}]
            })))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let config = LinearActionConfig {
            api_key: "k".into(),
            team_id: "missing".into(),
            title: "t".into(),
            description: String::new(),
            priority: None,
            endpoint: Some(server.uri()),
        };
        let err = execute(&dispatcher, &config, &json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}

//! Outbound webhook executor

use super::template::{interpolate, interpolate_value};
use super::{truncate_body, ActionAuth, ActionError, ActionOutcome, Dispatcher};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

fn default_method() -> String {
    "POST".to_string()
}

/// Webhook action node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookActionConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: ActionAuth,
    #[serde(default)]
    pub body: Value,
}

pub async fn execute(
    dispatcher: &Dispatcher,
    config: &WebhookActionConfig,
    context: &Value,
    timeout: Duration,
) -> Result<ActionOutcome, ActionError> {
    let url = interpolate(&config.url, context);
    let method = match config.method.to_uppercase().as_str() {
        "POST" => reqwest::Method::POST,
        "PUT" => reqwest::Method::PUT,
        "PATCH" => reqwest::Method::PATCH,
        other => {
            return Err(ActionError::Fatal(format!(
                "unsupported webhook method: {other}"
            )))
        }
    };

    let mut request = dispatcher.http.request(method, &url).timeout(timeout);

    for (name, value) in &config.headers {
        request = request.header(name, interpolate(value, context));
    }

    request = match &config.auth {
        ActionAuth::None => request,
        ActionAuth::Bearer { token } => request.bearer_auth(token),
        ActionAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
        ActionAuth::Oauth2 {
            token_url,
            client_id,
            client_secret,
            scope,
        } => {
            let token = dispatcher
                .tokens
                .token(
                    &dispatcher.http,
                    token_url,
                    client_id,
                    client_secret,
                    scope.as_deref(),
                )
                .await?;
            request.bearer_auth(token)
        }
        ActionAuth::Custom { headers } => {
            let mut req = request;
            for (name, value) in headers {
                req = req.header(name, value);
            }
            req
        }
    };

    if !config.body.is_null() {
        request = request.json(&interpolate_value(&config.body, context));
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ActionError::Retryable(format!("webhook timed out: {e}"))
        } else {
            ActionError::Retryable(format!("webhook request failed: {e}"))
        }
    })?;

    let status = response.status();
    let body = truncate_body(&response.text().await.unwrap_or_default());
    debug!(%url, status = status.as_u16(), "webhook action response");

    if status.is_success() {
        Ok(ActionOutcome {
            result: json!({ "status_code": status.as_u16(), "body": body }),
            ticket: None,
        })
    } else if status.as_u16() == 401 {
        // A stale cached token is replaced so the next run starts fresh.
        if let ActionAuth::Oauth2 {
            token_url,
            client_id,
            ..
        } = &config.auth
        {
            dispatcher.tokens.invalidate(token_url, client_id);
        }
        Err(ActionError::Fatal(format!("webhook returned 401: {body}")))
    } else if status.is_server_error() {
        Err(ActionError::Retryable(format!(
            "webhook returned {}: {body}",
            status.as_u16()
        )))
    } else {
        Err(ActionError::Fatal(format!(
            "webhook returned {}: {body}",
            status.as_u16()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Dispatcher;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> WebhookActionConfig {
        WebhookActionConfig {
            url,
            method: "POST".into(),
            headers: HashMap::new(),
            auth: ActionAuth::None,
            body: json!({"title": "{{incident.title}}"}),
        }
    }

    #[tokio::test]
    async fn posts_interpolated_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({"title": "High CPU"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let context = json!({"incident": {"title": "High CPU"}});
        let outcome = execute(
            &dispatcher,
            &config(format!("{}/hook", server.uri())),
            &context,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(outcome.result["status_code"], 200);
    }

    #[tokio::test]
    async fn server_errors_are_retryable_client_errors_are_not() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let context = json!({});

        let err = execute(
            &dispatcher,
            &config(format!("{}/down", server.uri())),
            &context,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());

        let err = execute(
            &dispatcher,
            &config(format!("{}/bad", server.uri())),
            &context,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn bearer_auth_header_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new();
        let mut cfg = config(server.uri());
        cfg.auth = ActionAuth::Bearer {
            token: "tok-1".into(),
        };
        cfg.body = Value::Null;
        execute(&dispatcher, &cfg, &json!({}), Duration::from_secs(5))
            .await
            .unwrap();
    }
}

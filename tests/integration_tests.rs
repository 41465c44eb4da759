use alertplane::services::escalations::scheduler;
use alertplane::{queue, Platform};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_platform() -> Arc<Platform> {
    Arc::new(Platform::in_memory().unwrap())
}

fn router(platform: &Arc<Platform>) -> Router {
    alertplane::gateway::create_router(platform.clone())
}

const ADMIN: &[(&str, &str)] = &[("x-actor-id", "admin-1"), ("x-actor-role", "platform_admin")];

fn sign(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll a GET endpoint until the predicate holds; panics after ~5 seconds.
async fn wait_for(app: &Router, uri: &str, predicate: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..200 {
        let (status, body) = send(app, "GET", uri, &[], None).await;
        if status == StatusCode::OK && predicate(&body) {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("condition never held for {uri}");
}

/// Default escalation policy for team-1: two levels, one repeat cycle.
async fn create_default_policy(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/escalation-policies",
        ADMIN,
        Some(json!({
            "team_id": "team-1",
            "name": "Default policy",
            "repeat_count": 1,
            "is_default": true,
            "levels": [
                {"timeout_minutes": 5, "targets": [{"type": "user", "id": "u1"}]},
                {"timeout_minutes": 10, "targets": [{"type": "entire_team"}]}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

/// Returns (integration id, name, signing secret).
async fn create_integration(app: &Router, name: &str, extra: Value) -> (String, String, String) {
    let mut payload = json!({
        "name": name,
        "provider": "generic",
        "team_id": "team-1",
    });
    if let (Some(base), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    let (status, body) = send(app, "POST", "/api/integrations", ADMIN, Some(payload)).await;
    assert_eq!(status, StatusCode::CREATED);
    (
        body["id"].as_str().unwrap().to_string(),
        name.to_string(),
        body["signing_secret"].as_str().unwrap().to_string(),
    )
}

async fn post_alert(
    app: &Router,
    integration: &str,
    secret: &str,
    body: &Value,
    extra_headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let raw = body.to_string();
    let signature = sign(secret, &raw);
    let mut headers: Vec<(&str, &str)> = vec![("x-webhook-signature", signature.as_str())];
    headers.extend_from_slice(extra_headers);

    let uri = format!("/webhooks/alerts/{integration}");
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in &headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .header("content-type", "application/json")
        .body(Body::from(raw))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn sample_alert() -> Value {
    json!({
        "title": "High CPU",
        "severity": "critical",
        "timestamp": "2025-01-10T00:00:00Z",
        "source": "api-1"
    })
}

#[tokio::test]
async fn signed_alert_becomes_incident_and_schedules_escalation() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    // 1. Signed alert is accepted
    let (status, body) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "created");
    assert_eq!(body["severity"], "CRITICAL");
    let incident_id = body["incident_id"].as_str().unwrap().to_string();

    // 2. Incident is OPEN at level 0 with the default policy attached
    let (status, incident) = send(&app, "GET", &format!("/api/incidents/{incident_id}"), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(incident["status"], "OPEN");
    assert_eq!(incident["current_level"], 0);
    assert_eq!(incident["alert_count"], 1);
    assert!(incident["escalation_policy_id"].is_string());

    // 3. The level-1 timer is armed under the canonical id
    let pending = platform
        .queue
        .pending_with_prefix(&scheduler::job_prefix(&incident_id))
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, scheduler::job_id(&incident_id, 1, 0));
}

#[tokio::test]
async fn replayed_delivery_inside_window_is_duplicate() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (integration_id, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    let (status, first) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;
    assert_eq!(status, StatusCode::CREATED);

    // Identical replay inside the window
    let (status, second) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["idempotent"], true);
    assert_eq!(second["alert_id"], first["alert_id"]);

    // Two delivery rows, one alert
    let (_, deliveries) = send(
        &app,
        "GET",
        &format!("/api/integrations/{integration_id}/deliveries"),
        &[],
        None,
    )
    .await;
    assert_eq!(deliveries["deliveries"].as_array().unwrap().len(), 2);

    let (_, alerts) = send(&app, "GET", "/api/alerts", &[], None).await;
    assert_eq!(alerts["alerts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_idempotency_keys_produce_one_alert() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "hooks", json!({})).await;

    let (status, first) = post_alert(
        &app,
        &name,
        &secret,
        &sample_alert(),
        &[("idempotency-key", "key-123")],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Same key, different body: still the same alert.
    let mut altered = sample_alert();
    altered["description"] = json!("changed body");
    let (status, second) = post_alert(
        &app,
        &name,
        &secret,
        &altered,
        &[("idempotency-key", "key-123")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["alert_id"], first["alert_id"]);

    let (_, alerts) = send(&app, "GET", "/api/alerts", &[], None).await;
    assert_eq!(alerts["alerts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn same_identity_groups_into_open_incident() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    let (_, first) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;

    // Different payload, same {title, source, severity}
    let mut related = sample_alert();
    related["description"] = json!("load spiked again");
    related["timestamp"] = json!("2025-01-10T00:03:00Z");
    let (status, second) = post_alert(&app, &name, &secret, &related, &[]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["status"], "grouped");
    assert_eq!(second["incident_id"], first["incident_id"]);

    let incident_id = first["incident_id"].as_str().unwrap();
    let (_, incident) = send(&app, "GET", &format!("/api/incidents/{incident_id}"), &[], None).await;
    assert_eq!(incident["alert_count"], 2);

    let (_, alerts) = send(
        &app,
        "GET",
        &format!("/api/incidents/{incident_id}/alerts"),
        &[],
        None,
    )
    .await;
    assert_eq!(alerts["alerts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn resolving_stops_grouping() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    let (_, first) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;
    let incident_id = first["incident_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/incidents/{incident_id}/resolve"),
        ADMIN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Same identity after resolution starts a fresh incident.
    let mut follow_up = sample_alert();
    follow_up["timestamp"] = json!("2025-01-10T00:05:00Z");
    let (status, second) = post_alert(&app, &name, &secret, &follow_up, &[]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["status"], "created");
    assert_ne!(second["incident_id"].as_str().unwrap(), incident_id);
}

#[tokio::test]
async fn expired_timestamp_is_rejected_with_delivery_row() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (integration_id, name, secret) = create_integration(
        &app,
        "timed",
        json!({
            "timestamp_header": "x-webhook-timestamp",
            "timestamp_max_age_secs": 300
        }),
    )
    .await;

    let stale = (chrono::Utc::now().timestamp() - 400).to_string();
    let (status, body) = post_alert(
        &app,
        &name,
        &secret,
        &sample_alert(),
        &[("x-webhook-timestamp", stale.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["type"].as_str().unwrap().ends_with("/webhook-expired"));

    let future = (chrono::Utc::now().timestamp() + 120).to_string();
    let (status, body) = post_alert(
        &app,
        &name,
        &secret,
        &sample_alert(),
        &[("x-webhook-timestamp", future.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["type"]
        .as_str()
        .unwrap()
        .ends_with("/webhook-timestamp-future"));

    // Both rejections were recorded with their returned status.
    let (_, deliveries) = send(
        &app,
        "GET",
        &format!("/api/integrations/{integration_id}/deliveries"),
        &[],
        None,
    )
    .await;
    let rows = deliveries["deliveries"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row["http_status"] == 401));
}

#[tokio::test]
async fn signature_failures_are_unauthorized() {
    let platform = test_platform();
    let app = router(&platform);
    let (_, name, _secret) = create_integration(&app, "strict", json!({})).await;

    // Wrong secret
    let (status, body) = post_alert(&app, &name, "wrong-secret", &sample_alert(), &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["type"].as_str().unwrap().ends_with("/invalid-signature"));

    // No signature header at all
    let (status, body) = send(
        &app,
        "POST",
        &format!("/webhooks/alerts/{name}"),
        &[],
        Some(sample_alert()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["type"].as_str().unwrap().ends_with("/missing-signature"));

    // Unknown integration
    let (status, body) = send(
        &app,
        "POST",
        "/webhooks/alerts/no-such-integration",
        &[],
        Some(sample_alert()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["type"]
        .as_str()
        .unwrap()
        .ends_with("/integration-not-found"));
}

#[tokio::test]
async fn invalid_payload_returns_validation_problem() {
    let platform = test_platform();
    let app = router(&platform);
    let (_, name, secret) = create_integration(&app, "picky", json!({})).await;

    let (status, body) = post_alert(&app, &name, &secret, &json!({"description": "??"}), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["type"].as_str().unwrap().ends_with("/validation-failed"));
    assert!(body["validation_errors"].as_array().unwrap().len() >= 2);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn escalation_fires_advances_level_and_ack_cancels() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    let (_, created) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;
    let incident_id = created["incident_id"].as_str().unwrap().to_string();

    // Re-arm the level-1 timer with no delay: same id replaces the timer.
    platform
        .queue
        .schedule_in(
            &scheduler::job_id(&incident_id, 1, 0),
            queue::KIND_ESCALATION,
            &json!({ "incident_id": incident_id, "to_level": 1, "cycle": 0 }),
            chrono::Duration::zero(),
        )
        .unwrap();
    assert_eq!(queue::tick(&platform).await, 1);

    let uri = format!("/api/incidents/{incident_id}");
    wait_for(&app, &uri, |incident| incident["current_level"] == 1).await;

    // The level-2 timer is armed next.
    let pending = platform
        .queue
        .pending_with_prefix(&scheduler::job_prefix(&incident_id))
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, scheduler::job_id(&incident_id, 2, 0));

    // Acknowledging cancels every pending escalation timer.
    let (status, acked) = send(
        &app,
        "POST",
        &format!("/api/incidents/{incident_id}/acknowledge"),
        &[("x-actor-id", "responder-7")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "ACKNOWLEDGED");
    let pending = platform
        .queue
        .pending_with_prefix(&scheduler::job_prefix(&incident_id))
        .unwrap();
    assert!(pending.is_empty());

    // A fired timer after the ack is a no-op.
    platform
        .queue
        .schedule_in(
            &scheduler::job_id(&incident_id, 2, 0),
            queue::KIND_ESCALATION,
            &json!({ "incident_id": incident_id, "to_level": 2, "cycle": 0 }),
            chrono::Duration::zero(),
        )
        .unwrap();
    queue::tick(&platform).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let (_, incident) = send(&app, "GET", &uri, &[], None).await;
    assert_eq!(incident["current_level"], 1);
}

fn two_step_workflow(url_a: String, url_b: String) -> Value {
    json!({
        "name": "notify twice",
        "team_id": "team-1",
        "definition": {
            "nodes": [
                {"id": "trigger", "type": "trigger"},
                {"id": "a", "type": "action", "config": {
                    "kind": "webhook", "url": url_a, "method": "POST",
                    "body": {"incident": "{{incident.id}}"},
                    "retry_attempts": 3, "retry_initial_delay_ms": 1
                }},
                {"id": "b", "type": "action", "config": {
                    "kind": "webhook", "url": url_b, "method": "POST",
                    "retry_attempts": 1
                }}
            ],
            "edges": [
                {"source": "trigger", "target": "a"},
                {"source": "a", "target": "b"}
            ],
            "trigger": {"type": "incident_created"},
            "settings": {"timeout": "1min", "enabled": true}
        }
    })
}

#[tokio::test]
async fn workflow_stops_on_first_failure() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (status, workflow) = send(
        &app,
        "POST",
        "/api/workflows",
        ADMIN,
        Some(two_step_workflow(
            format!("{}/a", server.uri()),
            format!("{}/b", server.uri()),
        )),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let workflow_id = workflow["id"].as_str().unwrap().to_string();

    post_alert(&app, &name, &secret, &sample_alert(), &[]).await;

    let executions_uri = format!("/api/workflows/{workflow_id}/executions");
    let executions = wait_for(&app, &executions_uri, |body| {
        body["executions"]
            .as_array()
            .map(|list| !list.is_empty() && list[0]["status"] == "FAILED")
            .unwrap_or(false)
    })
    .await;

    let execution = &executions["executions"][0];
    let nodes: Vec<Value> =
        serde_json::from_str(execution["completed_nodes"].as_str().unwrap()).unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["node_id"], "trigger");
    assert_eq!(nodes[0]["status"], "completed");
    assert_eq!(nodes[1]["node_id"], "a");
    assert_eq!(nodes[1]["status"], "failed");
    assert!(execution["error"].as_str().unwrap().contains("500"));
}

#[tokio::test]
async fn condition_takes_exactly_one_branch() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "datadog-prod", json!({})).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/critical"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/other"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (status, workflow) = send(
        &app,
        "POST",
        "/api/workflows",
        ADMIN,
        Some(json!({
            "name": "branch on severity",
            "team_id": "team-1",
            "definition": {
                "nodes": [
                    {"id": "trigger", "type": "trigger"},
                    {"id": "is-critical", "type": "condition",
                     "config": {"field": "incident.severity", "value": "CRITICAL"}},
                    {"id": "page", "type": "action", "config": {
                        "kind": "webhook", "url": format!("{}/critical", server.uri())
                    }},
                    {"id": "log-only", "type": "action", "config": {
                        "kind": "webhook", "url": format!("{}/other", server.uri())
                    }}
                ],
                "edges": [
                    {"source": "trigger", "target": "is-critical"},
                    {"source": "is-critical", "target": "page", "branch": "true"},
                    {"source": "is-critical", "target": "log-only", "branch": "false"}
                ],
                "trigger": {"type": "incident_created"},
                "settings": {"timeout": "1min", "enabled": true}
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let workflow_id = workflow["id"].as_str().unwrap().to_string();

    post_alert(&app, &name, &secret, &sample_alert(), &[]).await;

    let executions_uri = format!("/api/workflows/{workflow_id}/executions");
    let executions = wait_for(&app, &executions_uri, |body| {
        body["executions"]
            .as_array()
            .map(|list| !list.is_empty() && list[0]["status"] == "COMPLETED")
            .unwrap_or(false)
    })
    .await;

    let nodes: Vec<Value> =
        serde_json::from_str(executions["executions"][0]["completed_nodes"].as_str().unwrap())
            .unwrap();
    let statuses: Vec<(&str, &str)> = nodes
        .iter()
        .map(|n| {
            (
                n["node_id"].as_str().unwrap(),
                n["status"].as_str().unwrap(),
            )
        })
        .collect();
    assert!(statuses.contains(&("page", "completed")));
    assert!(statuses.contains(&("log-only", "skipped")));
}

#[tokio::test]
async fn workflow_edit_bumps_version_and_round_trips() {
    let platform = test_platform();
    let app = router(&platform);

    let definition = json!({
        "nodes": [
            {"id": "trigger", "type": "trigger"},
            {"id": "notify", "type": "action",
             "config": {"kind": "webhook", "url": "https://hooks.example.com/x"}}
        ],
        "edges": [{"source": "trigger", "target": "notify"}],
        "trigger": {"type": "incident_created"},
        "settings": {"timeout": "5min", "enabled": true}
    });
    let (status, workflow) = send(
        &app,
        "POST",
        "/api/workflows",
        ADMIN,
        Some(json!({"name": "wf", "team_id": "team-1", "definition": definition})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(workflow["version"], 1);
    let id = workflow["id"].as_str().unwrap().to_string();

    // Edit increments the version by one and appends a snapshot.
    let (status, updated) = send(
        &app,
        "PATCH",
        &format!("/api/workflows/{id}"),
        ADMIN,
        Some(json!({"name": "wf v2", "team_id": "team-1", "definition": definition})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["version"], 2);

    let (_, versions) = send(&app, "GET", &format!("/api/workflows/{id}/versions"), &[], None).await;
    assert_eq!(versions["versions"].as_array().unwrap().len(), 2);

    // Export → import produces an identical definition, same team.
    let (_, exported) = send(&app, "GET", &format!("/api/workflows/{id}/export"), &[], None).await;
    assert_eq!(exported["team_id"], "team-1");
    let (status, imported) = send(&app, "POST", "/api/workflows/import", ADMIN, Some(exported.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(imported["definition"], exported["definition"]);
    assert_eq!(imported["scope"], "team");
    assert_eq!(imported["team_id"], "team-1");
}

#[tokio::test]
async fn manual_execution_bypasses_trigger_conditions() {
    let platform = test_platform();
    let app = router(&platform);
    create_default_policy(&app).await;
    let (_, name, secret) = create_integration(&app, "quiet", json!({})).await;

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Trigger conditions that the incident does NOT satisfy.
    let (_, workflow) = send(
        &app,
        "POST",
        "/api/workflows",
        ADMIN,
        Some(json!({
            "name": "manual only",
            "team_id": "team-1",
            "definition": {
                "nodes": [
                    {"id": "trigger", "type": "trigger"},
                    {"id": "act", "type": "action",
                     "config": {"kind": "webhook", "url": server.uri()}}
                ],
                "edges": [{"source": "trigger", "target": "act"}],
                "trigger": {
                    "type": "incident_created",
                    "conditions": {"incident.severity": "INFO"}
                },
                "settings": {"timeout": "1min", "enabled": true}
            }
        })),
    )
    .await;
    let workflow_id = workflow["id"].as_str().unwrap().to_string();

    // CRITICAL incident does not match the INFO condition: no execution.
    let (_, created) = post_alert(&app, &name, &secret, &sample_alert(), &[]).await;
    let incident_id = created["incident_id"].as_str().unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let (_, executions) = send(
        &app,
        "GET",
        &format!("/api/workflows/{workflow_id}/executions"),
        &[],
        None,
    )
    .await;
    assert!(executions["executions"].as_array().unwrap().is_empty());

    // Manual run skips condition evaluation entirely.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/workflows/{workflow_id}/execute"),
        ADMIN,
        Some(json!({"incident_id": incident_id})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for(
        &app,
        &format!("/api/workflows/{workflow_id}/executions"),
        |body| {
            body["executions"]
                .as_array()
                .map(|list| !list.is_empty() && list[0]["status"] == "COMPLETED")
                .unwrap_or(false)
        },
    )
    .await;
}

fn runbook_payload(url: &str) -> Value {
    json!({
        "name": "restart service",
        "description": "kick the service over its admin endpoint",
        "webhook_url": url,
        "http_method": "POST",
        "timeout_secs": 30,
        "parameter_schema": {
            "service": {"type": "string", "required": true}
        },
        "payload_template": {"service": "{{parameters.service}}"}
    })
}

#[tokio::test]
async fn runbook_edit_demotes_from_approved() {
    let platform = test_platform();
    let app = router(&platform);

    let (status, runbook) = send(
        &app,
        "POST",
        "/api/runbooks",
        ADMIN,
        Some(runbook_payload("https://ops.example.com/restart")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(runbook["approval_status"], "DRAFT");
    let id = runbook["id"].as_str().unwrap().to_string();

    // Non-admins cannot approve.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runbooks/{id}/approve"),
        &[("x-actor-id", "user-1")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = send(&app, "POST", &format!("/api/runbooks/{id}/approve"), ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["approval_status"], "APPROVED");
    assert_eq!(approved["approved_by"], "admin-1");
    let approved_version = approved["version"].as_i64().unwrap();

    // Editing the payload template demotes back to DRAFT, approver cleared.
    let mut edited = runbook_payload("https://ops.example.com/restart");
    edited["payload_template"] = json!({"service": "{{parameters.service}}", "force": true});
    let (status, demoted) = send(
        &app,
        "PATCH",
        &format!("/api/runbooks/{id}"),
        ADMIN,
        Some(edited),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(demoted["approval_status"], "DRAFT");
    assert_eq!(demoted["version"], approved_version + 1);
    assert!(demoted["approved_by"].is_null());

    let (_, versions) = send(&app, "GET", &format!("/api/runbooks/{id}/versions"), &[], None).await;
    let latest = &versions["versions"][0];
    assert!(latest["change_note"]
        .as_str()
        .unwrap()
        .contains("reverted from APPROVED to DRAFT"));
}

#[tokio::test]
async fn runbook_executes_with_typed_parameters() {
    let platform = test_platform();
    let app = router(&platform);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(wiremock::matchers::body_json(json!({"service": "billing"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("restarted"))
        .expect(1)
        .mount(&server)
        .await;

    let (_, runbook) = send(&app, "POST", "/api/runbooks", ADMIN, Some(runbook_payload(&server.uri()))).await;
    let id = runbook["id"].as_str().unwrap().to_string();

    // Missing required parameter is rejected before any HTTP call.
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/runbooks/{id}/execute"),
        ADMIN,
        Some(json!({"parameters": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["type"].as_str().unwrap().ends_with("/validation-failed"));

    let (status, execution) = send(
        &app,
        "POST",
        &format!("/api/runbooks/{id}/execute"),
        ADMIN,
        Some(json!({"parameters": {"service": "billing"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(execution["status"], "SUCCESS");
    assert_eq!(execution["status_code"], 200);
    assert_eq!(execution["response_body"], "restarted");
    assert_eq!(execution["triggered_by"], "manual");

    // Deprecated runbooks refuse to run.
    send(&app, "POST", &format!("/api/runbooks/{id}/approve"), ADMIN, None).await;
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runbooks/{id}/deprecate"),
        ADMIN,
        Some(json!({"reason": "superseded"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/runbooks/{id}/execute"),
        ADMIN,
        Some(json!({"parameters": {"service": "billing"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn runbook_rollback_requires_reapproval() {
    let platform = test_platform();
    let app = router(&platform);

    let (_, runbook) = send(
        &app,
        "POST",
        "/api/runbooks",
        ADMIN,
        Some(runbook_payload("https://ops.example.com/v1")),
    )
    .await;
    let id = runbook["id"].as_str().unwrap().to_string();

    let mut v2 = runbook_payload("https://ops.example.com/v2");
    v2["name"] = json!("restart service v2");
    send(&app, "PATCH", &format!("/api/runbooks/{id}"), ADMIN, Some(v2)).await;

    let (status, rolled_back) = send(
        &app,
        "POST",
        &format!("/api/runbooks/{id}/rollback/1"),
        ADMIN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rolled_back["version"], 3);
    assert_eq!(rolled_back["approval_status"], "DRAFT");
    assert_eq!(rolled_back["webhook_url"], "https://ops.example.com/v1");
    assert_eq!(rolled_back["name"], "restart service");
}

#[tokio::test]
async fn templates_are_seeded_and_instantiable() {
    let platform = test_platform();
    let app = router(&platform);

    let (status, templates) = send(&app, "GET", "/api/workflow-templates", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(templates["templates"].as_array().unwrap().len(), 3);

    let (_, ticketing) = send(
        &app,
        "GET",
        "/api/workflow-templates?category=Ticketing",
        &[],
        None,
    )
    .await;
    let list = ticketing["templates"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    let template_id = list[0]["id"].as_str().unwrap().to_string();

    let (status, workflow) = send(
        &app,
        "POST",
        &format!("/api/workflow-templates/{template_id}/use"),
        ADMIN,
        Some(json!({"name": "our ticketing", "team_id": "team-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(workflow["is_template"], false);
    assert_eq!(workflow["team_id"], "team-1");
    // Instantiated copies start disabled.
    assert_eq!(workflow["enabled"], false);
}

#[tokio::test]
async fn integration_secret_shown_once_and_rotation_audited() {
    let platform = test_platform();
    let app = router(&platform);

    let (id, _, secret) = create_integration(&app, "secretive", json!({})).await;
    assert_eq!(secret.len(), 64);

    // Reads only expose an 8-char preview.
    let (_, fetched) = send(&app, "GET", &format!("/api/integrations/{id}"), &[], None).await;
    assert!(fetched.get("signing_secret").is_none());
    let preview = fetched["secret_preview"].as_str().unwrap();
    assert!(preview.starts_with(&secret[..8]));
    assert!(!preview.contains(&secret[..16]));

    let (status, rotated) = send(
        &app,
        "POST",
        &format!("/api/integrations/{id}/rotate-secret"),
        ADMIN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["signing_secret"].as_str().unwrap(), secret);

    let (_, audit) = send(
        &app,
        "GET",
        "/api/audit?action=integration.secret_rotated",
        &[],
        None,
    )
    .await;
    let events = audit["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["severity"], "HIGH");
    assert_eq!(events[0]["actor_id"], "admin-1");
}

#[tokio::test]
async fn escalation_levels_stay_dense() {
    let platform = test_platform();
    let app = router(&platform);
    let policy_id = create_default_policy(&app).await;

    let (status, policy) = send(
        &app,
        "POST",
        &format!("/api/escalation-policies/{policy_id}/levels"),
        ADMIN,
        Some(json!({"timeout_minutes": 15, "targets": []})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let numbers: Vec<i64> = policy["levels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    // Deleting the middle level renumbers the tail.
    let (status, policy) = send(
        &app,
        "DELETE",
        &format!("/api/escalation-policies/{policy_id}/levels/2"),
        ADMIN,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let levels = policy["levels"].as_array().unwrap();
    let numbers: Vec<i64> = levels.iter().map(|l| l["number"].as_i64().unwrap()).collect();
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(levels[1]["timeout_minutes"], 15);
}

#[tokio::test]
async fn webhook_test_endpoint_is_open() {
    let platform = test_platform();
    let app = router(&platform);
    create_integration(&app, "probed", json!({})).await;

    let (status, body) = send(&app, "GET", "/webhooks/alerts/probed/test", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["details"]["provider"], "generic");

    // Unknown integrations still get a liveness answer.
    let (status, body) = send(&app, "GET", "/webhooks/alerts/ghost/test", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["details"].is_null());
}

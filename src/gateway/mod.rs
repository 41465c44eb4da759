//! HTTP gateway: router assembly and ingress

pub mod ingress;

use crate::services::{audit, escalations, incidents, integrations, runbooks, webhooks, workflows};
use crate::Platform;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Assemble the full route table over the shared platform state.
pub fn create_router(platform: Arc<Platform>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook ingress
        .route(
            "/webhooks/alerts/:integration_name",
            post(webhooks::handlers::ingest),
        )
        .route(
            "/webhooks/alerts/:integration_name/test",
            get(webhooks::handlers::test),
        )
        // Integrations
        .route(
            "/api/integrations",
            post(integrations::handlers::create).get(integrations::handlers::list),
        )
        .route(
            "/api/integrations/:id",
            get(integrations::handlers::get)
                .patch(integrations::handlers::update)
                .delete(integrations::handlers::delete),
        )
        .route(
            "/api/integrations/:id/rotate-secret",
            post(integrations::handlers::rotate_secret),
        )
        .route(
            "/api/integrations/:id/deliveries",
            get(integrations::handlers::deliveries),
        )
        // Incidents and alerts
        .route("/api/incidents", get(incidents::handlers::list))
        .route("/api/incidents/:id", get(incidents::handlers::get))
        .route("/api/incidents/:id/alerts", get(incidents::handlers::alerts))
        .route(
            "/api/incidents/:id/acknowledge",
            post(incidents::handlers::acknowledge),
        )
        .route("/api/incidents/:id/resolve", post(incidents::handlers::resolve))
        .route("/api/incidents/:id/assign", post(incidents::handlers::assign))
        .route("/api/alerts", get(incidents::handlers::list_alerts))
        .route("/api/alerts/:id", get(incidents::handlers::get_alert))
        // Escalation policies
        .route(
            "/api/escalation-policies",
            post(escalations::handlers::create).get(escalations::handlers::list),
        )
        .route(
            "/api/escalation-policies/:id",
            get(escalations::handlers::get)
                .patch(escalations::handlers::update)
                .delete(escalations::handlers::delete),
        )
        .route(
            "/api/escalation-policies/:id/levels",
            post(escalations::handlers::add_level),
        )
        .route(
            "/api/escalation-policies/:id/levels/:number",
            patch(escalations::handlers::update_level).delete(escalations::handlers::delete_level),
        )
        // Workflows
        .route(
            "/api/workflows",
            post(workflows::handlers::create).get(workflows::handlers::list),
        )
        .route("/api/workflows/import", post(workflows::handlers::import))
        .route(
            "/api/workflows/:id",
            get(workflows::handlers::get)
                .patch(workflows::handlers::update)
                .delete(workflows::handlers::delete),
        )
        .route("/api/workflows/:id/toggle", patch(workflows::handlers::toggle))
        .route(
            "/api/workflows/:id/duplicate",
            post(workflows::handlers::duplicate),
        )
        .route("/api/workflows/:id/export", get(workflows::handlers::export))
        .route("/api/workflows/:id/versions", get(workflows::handlers::versions))
        .route(
            "/api/workflows/:id/rollback/:version",
            post(workflows::handlers::rollback),
        )
        .route("/api/workflows/:id/execute", post(workflows::handlers::execute))
        .route(
            "/api/workflows/:id/executions",
            get(workflows::handlers::executions),
        )
        .route(
            "/api/workflows/:id/analytics",
            get(workflows::handlers::analytics),
        )
        .route(
            "/api/workflow-executions/:id",
            get(workflows::handlers::get_execution),
        )
        // Workflow templates
        .route(
            "/api/workflow-templates",
            get(workflows::handlers::list_templates).post(workflows::handlers::create_template),
        )
        .route(
            "/api/workflow-templates/:id",
            get(workflows::handlers::get_template)
                .patch(workflows::handlers::update_template)
                .delete(workflows::handlers::delete_template),
        )
        .route(
            "/api/workflow-templates/:id/use",
            post(workflows::handlers::use_template),
        )
        // Runbooks
        .route(
            "/api/runbooks",
            post(runbooks::handlers::create).get(runbooks::handlers::list),
        )
        .route(
            "/api/runbooks/:id",
            get(runbooks::handlers::get)
                .patch(runbooks::handlers::update)
                .delete(runbooks::handlers::delete),
        )
        .route("/api/runbooks/:id/approve", post(runbooks::handlers::approve))
        .route(
            "/api/runbooks/:id/deprecate",
            post(runbooks::handlers::deprecate),
        )
        .route("/api/runbooks/:id/versions", get(runbooks::handlers::versions))
        .route(
            "/api/runbooks/:id/rollback/:version",
            post(runbooks::handlers::rollback),
        )
        .route("/api/runbooks/:id/execute", post(runbooks::handlers::execute))
        .route(
            "/api/runbooks/:id/executions",
            get(runbooks::handlers::executions),
        )
        // Audit
        .route("/api/audit", get(audit::handlers::query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(platform)
}

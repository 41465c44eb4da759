//! SQLite schema for the control plane

/// SQL to create all tables
pub const SCHEMA: &str = r#"
-- Inbound integrations (one per signed webhook source)
CREATE TABLE IF NOT EXISTS integrations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    provider TEXT NOT NULL DEFAULT 'generic',
    team_id TEXT,

    -- Signing material. The secret is opaque after creation.
    signing_secret TEXT NOT NULL,
    signature_header TEXT NOT NULL DEFAULT 'x-webhook-signature',
    signature_algorithm TEXT NOT NULL DEFAULT 'sha256',
    signature_format TEXT NOT NULL DEFAULT 'hex',
    signature_prefix TEXT,

    -- Replay protection
    timestamp_header TEXT,
    timestamp_max_age_secs INTEGER NOT NULL DEFAULT 300,

    dedup_window_minutes INTEGER NOT NULL DEFAULT 15,
    active INTEGER NOT NULL DEFAULT 1,
    default_service TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_integrations_name ON integrations(name);

-- One immutable row per inbound webhook request, duplicates and failures included
CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id TEXT PRIMARY KEY,
    integration_id TEXT NOT NULL,
    idempotency_key TEXT,
    content_fingerprint TEXT NOT NULL,
    payload TEXT NOT NULL,
    headers TEXT NOT NULL,
    http_status INTEGER NOT NULL,
    error TEXT,
    alert_id TEXT,
    processed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliveries_fingerprint
    ON webhook_deliveries(integration_id, content_fingerprint, processed_at);
CREATE INDEX IF NOT EXISTS idx_deliveries_idempotency
    ON webhook_deliveries(integration_id, idempotency_key, processed_at);

-- Canonical alerts produced by the normalizer
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'OPEN',
    source TEXT NOT NULL DEFAULT '',
    external_id TEXT,
    triggered_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    integration_id TEXT NOT NULL,
    incident_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_alerts_integration ON alerts(integration_id, triggered_at);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status, triggered_at);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity, triggered_at);

-- Incidents group alerts by fingerprint inside the dedup window
CREATE TABLE IF NOT EXISTS incidents (
    id TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    title TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'OPEN',
    team_id TEXT,
    assigned_user_id TEXT,
    current_level INTEGER NOT NULL DEFAULT 0,
    escalation_policy_id TEXT,
    alert_count INTEGER NOT NULL DEFAULT 0,
    status_history TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    acknowledged_at TEXT,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_incidents_fingerprint ON incidents(fingerprint, team_id, status);
CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status, created_at);

-- Escalation policies and their ordered levels
CREATE TABLE IF NOT EXISTS escalation_policies (
    id TEXT PRIMARY KEY,
    team_id TEXT NOT NULL,
    name TEXT NOT NULL,
    repeat_count INTEGER NOT NULL DEFAULT 0,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_policies_team ON escalation_policies(team_id, is_default);

CREATE TABLE IF NOT EXISTS escalation_levels (
    id TEXT PRIMARY KEY,
    policy_id TEXT NOT NULL,
    level_number INTEGER NOT NULL,
    timeout_minutes INTEGER NOT NULL DEFAULT 5,
    targets TEXT NOT NULL DEFAULT '[]',

    FOREIGN KEY (policy_id) REFERENCES escalation_policies(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_levels_policy_number
    ON escalation_levels(policy_id, level_number);

-- Delayed-job queue backing table. Job ids are canonical; re-inserting an id
-- replaces the previous timer.
CREATE TABLE IF NOT EXISTS scheduled_jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    run_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_run_at ON scheduled_jobs(run_at);

-- Workflows and their immutable version snapshots
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    scope TEXT NOT NULL DEFAULT 'team',
    team_id TEXT,
    version INTEGER NOT NULL DEFAULT 1,
    enabled INTEGER NOT NULL DEFAULT 1,
    definition TEXT NOT NULL,
    is_template INTEGER NOT NULL DEFAULT 0,
    template_category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workflows_enabled ON workflows(enabled, is_template);

CREATE TABLE IF NOT EXISTS workflow_versions (
    workflow_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    definition TEXT NOT NULL,
    change_note TEXT NOT NULL DEFAULT '',
    changed_by TEXT,
    created_at TEXT NOT NULL,

    PRIMARY KEY (workflow_id, version),
    FOREIGN KEY (workflow_id) REFERENCES workflows(id) ON DELETE CASCADE
);

-- Executions persist their definition snapshot and node results
CREATE TABLE IF NOT EXISTS workflow_executions (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    incident_id TEXT,
    definition TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'PENDING',
    current_node_id TEXT,
    completed_nodes TEXT NOT NULL DEFAULT '[]',
    error TEXT,
    started_at TEXT,
    completed_at TEXT,
    failed_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id, created_at);

-- Runbooks with the approval state machine
CREATE TABLE IF NOT EXISTS runbooks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    webhook_url TEXT NOT NULL,
    http_method TEXT NOT NULL DEFAULT 'POST',
    headers TEXT NOT NULL DEFAULT '{}',
    auth TEXT NOT NULL DEFAULT '{"type":"none"}',
    parameter_schema TEXT NOT NULL DEFAULT '{}',
    payload_template TEXT NOT NULL DEFAULT '{}',
    timeout_secs INTEGER NOT NULL DEFAULT 30,
    team_id TEXT,
    version INTEGER NOT NULL DEFAULT 1,
    approval_status TEXT NOT NULL DEFAULT 'DRAFT',
    approved_by TEXT,
    approved_at TEXT,
    deprecation_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runbook_versions (
    runbook_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    definition TEXT NOT NULL,
    change_note TEXT NOT NULL DEFAULT '',
    changed_by TEXT,
    created_at TEXT NOT NULL,

    PRIMARY KEY (runbook_id, version),
    FOREIGN KEY (runbook_id) REFERENCES runbooks(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS runbook_executions (
    id TEXT PRIMARY KEY,
    runbook_id TEXT NOT NULL,
    incident_id TEXT,
    parameters TEXT NOT NULL DEFAULT '{}',
    triggered_by TEXT NOT NULL DEFAULT 'manual',
    status TEXT NOT NULL DEFAULT 'PENDING',
    status_code INTEGER,
    response_body TEXT,
    error TEXT,
    duration_ms INTEGER,
    started_at TEXT,
    finished_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runbook_executions ON runbook_executions(runbook_id, created_at);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    actor_id TEXT,
    team_id TEXT,
    resource_type TEXT,
    resource_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    severity TEXT NOT NULL DEFAULT 'INFO',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_events(action, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_team ON audit_events(team_id, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_severity ON audit_events(severity, created_at);
"#;

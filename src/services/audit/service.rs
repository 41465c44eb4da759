use crate::storage::StorageEngine;
use serde_json::Value;
use tracing::warn;

/// Append an audit event. A failed append never fails the mutation that
/// produced it; it is logged instead.
#[allow(clippy::too_many_arguments)]
pub fn record(
    storage: &StorageEngine,
    action: &str,
    actor_id: Option<&str>,
    team_id: Option<&str>,
    resource_type: Option<&str>,
    resource_id: Option<&str>,
    metadata: Value,
    severity: &str,
) {
    if let Err(e) = storage.append_audit_event(
        action,
        actor_id,
        team_id,
        resource_type,
        resource_id,
        &metadata.to_string(),
        severity,
    ) {
        warn!(action, "failed to append audit event: {e}");
    }
}

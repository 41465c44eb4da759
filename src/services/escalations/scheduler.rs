//! Escalation level timers
//!
//! Each pending step is a delayed job with the canonical id
//! `escalation:{incidentId}:{toLevel}:{cycle}`; re-scheduling the same id
//! replaces the earlier timer. On fire the worker re-checks incident state,
//! so duplicate or stale fires are no-ops.

use crate::error::Result;
use crate::queue::KIND_ESCALATION;
use crate::services::audit;
use crate::services::workflows::triggers::{self, TriggerEvent};
use crate::storage::{EscalationLevelRecord, IncidentRecord, ScheduledJobRecord};
use crate::Platform;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Notify retry schedule: 3 attempts, exponential from 30s
const NOTIFY_ATTEMPTS: u32 = 3;
const NOTIFY_INITIAL_BACKOFF_SECS: u64 = 30;

pub fn job_id(incident_id: &str, to_level: i64, cycle: i64) -> String {
    format!("escalation:{incident_id}:{to_level}:{cycle}")
}

pub fn job_prefix(incident_id: &str) -> String {
    format!("escalation:{incident_id}:")
}

/// Arm the level-1 timer for a newly created incident. Skipped quietly when
/// the incident has no policy or the policy has no levels.
pub fn schedule_initial(platform: &Platform, incident: &IncidentRecord) -> Result<()> {
    let Some(policy_id) = incident.escalation_policy_id.as_deref() else {
        debug!(incident_id = %incident.id, "no escalation policy, not scheduling");
        return Ok(());
    };
    let Some(level) = platform.storage.get_level(policy_id, 1)? else {
        debug!(incident_id = %incident.id, policy_id, "policy has no level 1");
        return Ok(());
    };
    schedule_level(platform, &incident.id, &level, 0)
}

/// Arm the timer for one level. The delay is the target level's timeout.
fn schedule_level(
    platform: &Platform,
    incident_id: &str,
    level: &EscalationLevelRecord,
    cycle: i64,
) -> Result<()> {
    let id = job_id(incident_id, level.level_number, cycle);
    let payload = json!({
        "incident_id": incident_id,
        "to_level": level.level_number,
        "cycle": cycle,
    });
    platform.queue.schedule_in(
        &id,
        KIND_ESCALATION,
        &payload,
        chrono::Duration::minutes(level.timeout_minutes),
    )
}

/// Drop every pending timer for the incident. Called on ack/resolve.
pub fn cancel_for_incident(platform: &Platform, incident_id: &str) -> Result<usize> {
    platform.queue.cancel_prefix(&job_prefix(incident_id))
}

/// Handle a fired timer.
pub async fn fire(platform: &Arc<Platform>, job: &ScheduledJobRecord) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(&job.payload)?;
    let incident_id = payload["incident_id"].as_str().unwrap_or_default().to_string();
    let to_level = payload["to_level"].as_i64().unwrap_or(0);
    let cycle = payload["cycle"].as_i64().unwrap_or(0);

    let incident = match platform.storage.get_incident(&incident_id) {
        Ok(incident) => incident,
        Err(_) => {
            warn!(job_id = %job.id, "incident gone, dropping escalation");
            return Ok(());
        }
    };

    // State re-check: acknowledged/resolved incidents and already-passed
    // levels make the fire a no-op.
    if incident.status != "OPEN" {
        debug!(incident_id, status = %incident.status, "incident not open, escalation is a no-op");
        return Ok(());
    }
    if incident.current_level >= to_level {
        debug!(incident_id, to_level, "level already reached, escalation is a no-op");
        return Ok(());
    }

    let Some(policy_id) = incident.escalation_policy_id.clone() else {
        return Ok(());
    };
    let Some(level) = platform.storage.get_level(&policy_id, to_level)? else {
        warn!(incident_id, to_level, "level removed from policy, stopping escalation");
        return Ok(());
    };

    notify_targets(platform, &incident, &level).await;

    if !platform.storage.advance_incident_level(&incident_id, to_level)? {
        // Raced with an ack or a parallel fire.
        return Ok(());
    }
    info!(incident_id, to_level, cycle, "incident escalated");

    triggers::dispatch(
        platform,
        TriggerEvent::Escalation {
            incident_id: incident_id.clone(),
            level: to_level,
        },
    )
    .await;

    arm_next(platform, &incident_id, &policy_id, to_level, cycle)?;
    Ok(())
}

/// Arm the follower of a just-fired level: the next level, or level 1 of
/// the next cycle while repeats remain.
fn arm_next(
    platform: &Platform,
    incident_id: &str,
    policy_id: &str,
    fired_level: i64,
    cycle: i64,
) -> Result<()> {
    if let Some(next) = platform.storage.get_level(policy_id, fired_level + 1)? {
        return schedule_level(platform, incident_id, &next, cycle);
    }

    let policy = platform.storage.get_escalation_policy(policy_id)?;
    if cycle < policy.repeat_count {
        if let Some(first) = platform.storage.get_level(policy_id, 1)? {
            platform.storage.reset_incident_level(incident_id)?;
            return schedule_level(platform, incident_id, &first, cycle + 1);
        }
    }

    debug!(incident_id, "escalation chain exhausted");
    Ok(())
}

/// Resolve the level's targets and hand them to the notifier boundary.
/// Failures are retried with exponential backoff; exhaustion advances the
/// level anyway and leaves an audit event.
async fn notify_targets(
    platform: &Arc<Platform>,
    incident: &IncidentRecord,
    level: &EscalationLevelRecord,
) {
    let mut backoff = std::time::Duration::from_secs(NOTIFY_INITIAL_BACKOFF_SECS);
    for attempt in 1..=NOTIFY_ATTEMPTS {
        match resolve_and_enqueue(incident, level) {
            Ok(count) => {
                debug!(
                    incident_id = %incident.id,
                    level = level.level_number,
                    targets = count,
                    "notifications enqueued"
                );
                return;
            }
            Err(e) if attempt < NOTIFY_ATTEMPTS => {
                warn!(
                    incident_id = %incident.id,
                    attempt,
                    "target notification failed, backing off: {e}"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                warn!(incident_id = %incident.id, "target notification exhausted: {e}");
                audit::record(
                    &platform.storage,
                    "escalation.notify_failed",
                    None,
                    incident.team_id.as_deref(),
                    Some("incident"),
                    Some(&incident.id),
                    json!({ "level": level.level_number, "error": e.to_string() }),
                    "HIGH",
                );
            }
        }
    }
}

/// The notification transport is an external collaborator; the enqueue
/// boundary here is target resolution plus a structured log line per target.
fn resolve_and_enqueue(incident: &IncidentRecord, level: &EscalationLevelRecord) -> Result<usize> {
    let targets = level.parsed_targets();
    for target in &targets {
        info!(
            incident_id = %incident.id,
            level = level.level_number,
            target = ?target,
            "notification enqueued"
        );
    }
    Ok(targets.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_canonical() {
        assert_eq!(job_id("inc-1", 2, 0), "escalation:inc-1:2:0");
        assert_eq!(job_prefix("inc-1"), "escalation:inc-1:");
        assert!(job_id("inc-1", 2, 1).starts_with(&job_prefix("inc-1")));
    }
}

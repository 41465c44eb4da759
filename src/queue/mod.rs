//! Delayed-job queue
//!
//! Jobs live in the `scheduled_jobs` table and a tokio poller drains the
//! due ones. The contract is: due jobs are delivered at least once,
//! re-scheduling an id replaces the earlier timer, and jobs can be
//! cancelled by id or id prefix. Fire handlers re-check entity state, so a
//! duplicate delivery after a crash is a no-op.

use crate::error::Result;
use crate::storage::{ScheduledJobRecord, StorageEngine};
use crate::Platform;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Job kind for escalation level timers
pub const KIND_ESCALATION: &str = "escalation";

/// Typed facade over the `scheduled_jobs` table
#[derive(Clone)]
pub struct JobQueue {
    storage: StorageEngine,
}

impl JobQueue {
    pub fn new(storage: StorageEngine) -> Self {
        Self { storage }
    }

    /// Schedule (or replace) a job to run after the delay.
    pub fn schedule_in(
        &self,
        id: &str,
        kind: &str,
        payload: &Value,
        delay: chrono::Duration,
    ) -> Result<()> {
        let run_at = (chrono::Utc::now() + delay).to_rfc3339();
        debug!(job_id = id, kind, %run_at, "scheduling delayed job");
        self.storage
            .enqueue_job(id, kind, &payload.to_string(), &run_at)
    }

    pub fn cancel(&self, id: &str) -> Result<bool> {
        self.storage.cancel_job(id)
    }

    /// Cancel every pending job with the id prefix; returns how many went.
    pub fn cancel_prefix(&self, prefix: &str) -> Result<usize> {
        let cancelled = self.storage.cancel_jobs_with_prefix(prefix)?;
        if cancelled > 0 {
            debug!(prefix, cancelled, "cancelled pending jobs");
        }
        Ok(cancelled)
    }

    pub fn pending_with_prefix(&self, prefix: &str) -> Result<Vec<ScheduledJobRecord>> {
        self.storage.pending_jobs_with_prefix(prefix)
    }
}

/// Poll loop. Spawned once at startup; each due job is handled on its own
/// task so a slow fire (retry backoff) does not stall the rest.
pub async fn run_poller(platform: Arc<Platform>) {
    let interval = std::time::Duration::from_millis(platform.config.poll_interval_ms);
    loop {
        tick(&platform).await;
        tokio::time::sleep(interval).await;
    }
}

/// One poll round: claim due jobs and dispatch them. Public so tests can
/// drive timers deterministically.
pub async fn tick(platform: &Arc<Platform>) -> usize {
    let due = match platform.storage.due_jobs(50) {
        Ok(due) => due,
        Err(e) => {
            error!("job poll failed: {e}");
            return 0;
        }
    };
    let count = due.len();

    for job in due {
        let platform = platform.clone();
        tokio::spawn(async move {
            dispatch(&platform, &job).await;
            if let Err(e) = platform.storage.complete_job(&job.id, &job.run_at) {
                error!(job_id = %job.id, "failed to complete job: {e}");
            }
        });
    }
    count
}

async fn dispatch(platform: &Arc<Platform>, job: &ScheduledJobRecord) {
    match job.kind.as_str() {
        KIND_ESCALATION => {
            if let Err(e) = crate::services::escalations::scheduler::fire(platform, job).await {
                error!(job_id = %job.id, "escalation job failed: {e}");
            }
        }
        other => warn!(job_id = %job.id, kind = other, "unknown job kind, dropping"),
    }
}

//! # alertplane - On-Call Incident Control Plane
//!
//! alertplane ingests signed alert webhooks and drives them through
//! deduplication, incident grouping, escalation and workflow automation.
//!
//! ## Pipeline
//!
//! signed webhook → signature + replay check → idempotency check →
//! normalize → group into an incident by fingerprint → arm the escalation
//! timer → match and run workflows.
//!
//! ## Quick start
//!
//! ```bash
//! # Start the control plane
//! cargo run
//!
//! # Probe an integration
//! curl http://localhost:8080/webhooks/alerts/my-integration/test
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod services;
pub mod storage;

pub use config::Config;
pub use error::{ApiError, Result};

use queue::JobQueue;
use services::webhooks::RateLimiter;
use std::sync::Arc;
use storage::StorageEngine;

/// Shared control-plane state: configuration, storage and the per-process
/// executor resources (HTTP client, OAuth token cache, rate limiter).
pub struct Platform {
    pub config: Config,
    pub storage: StorageEngine,
    pub actions: actions::Dispatcher,
    pub queue: JobQueue,
    pub rate_limiter: RateLimiter,
}

impl Platform {
    /// Build the platform from configuration, seeding the built-in workflow
    /// templates on first boot.
    pub fn with_config(config: Config) -> Result<Self> {
        error::set_problem_base(config.problem_base());
        let storage = StorageEngine::new(&config)?;
        Self::assemble(config, storage)
    }

    /// Fully in-memory platform (for testing)
    pub fn in_memory() -> Result<Self> {
        let config = Config::default();
        error::set_problem_base(config.problem_base());
        let storage = StorageEngine::in_memory()?;
        Self::assemble(config, storage)
    }

    fn assemble(config: Config, storage: StorageEngine) -> Result<Self> {
        services::workflows::templates::seed(&storage)?;
        Ok(Self {
            queue: JobQueue::new(storage.clone()),
            rate_limiter: RateLimiter::new(config.ingest_rate_limit),
            actions: actions::Dispatcher::new(),
            storage,
            config,
        })
    }

    /// Spawn the delayed-job poller and the age-trigger sweeper.
    pub fn start_workers(self: &Arc<Self>) {
        tokio::spawn(queue::run_poller(self.clone()));
        tokio::spawn(services::workflows::triggers::run_age_sweeper(self.clone()));
    }

    /// Explicit teardown of per-process mutable state.
    pub fn shutdown(&self) {
        self.actions.shutdown();
    }
}

//! Storage engine - SQLite metadata for every control-plane entity

mod engine;
mod schema;

mod alerts;
mod audit;
mod deliveries;
mod escalations;
mod incidents;
mod integrations;
mod jobs;
mod runbooks;
mod workflows;

pub use alerts::AlertRecord;
pub use audit::AuditEventRecord;
pub use deliveries::{DeliveryRecord, DuplicateCheck};
pub use engine::{now_rfc3339, StorageEngine};
pub use escalations::{EscalationLevelRecord, EscalationPolicyRecord, EscalationTarget};
pub use incidents::IncidentRecord;
pub use integrations::IntegrationRecord;
pub use jobs::ScheduledJobRecord;
pub use runbooks::{RunbookExecutionRecord, RunbookRecord, RunbookVersionRecord};
pub use workflows::{WorkflowExecutionRecord, WorkflowRecord, WorkflowVersionRecord};

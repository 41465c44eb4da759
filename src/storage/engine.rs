//! Storage engine implementation

use crate::config::Config;
use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::fs;
use std::sync::Arc;

use super::schema::SCHEMA;

/// SQLite-backed storage engine shared by every service.
///
/// The connection mutex is the serialization point for the dedup and
/// grouping paths: existence check and insert happen under one lock
/// acquisition, so two concurrent deliveries cannot both create an
/// incident for the same fingerprint.
#[derive(Clone)]
pub struct StorageEngine {
    pub(crate) db: Arc<Mutex<Connection>>,
}

impl StorageEngine {
    /// Create a new storage engine
    pub fn new(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let db_path = config.data_dir.join("alertplane.db");
        let conn = Connection::open(&db_path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory storage engine (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

/// RFC 3339 UTC timestamp used across storage rows
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

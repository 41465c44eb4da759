use super::engine::StorageEngine;
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// In-flight marker for a reserved delivery row, replaced on finalize
pub const DELIVERY_STATUS_PENDING: i64 = 0;

/// Immutable record of one inbound webhook request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub integration_id: String,
    pub idempotency_key: Option<String>,
    pub content_fingerprint: String,
    pub payload: String,
    pub headers: String,
    pub http_status: i64,
    pub error: Option<String>,
    pub alert_id: Option<String>,
    pub processed_at: String,
}

/// Outcome of a delivery-level duplicate probe
#[derive(Debug, Clone, Default)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub existing_alert_id: Option<String>,
    pub existing_delivery_id: Option<String>,
}

impl StorageEngine {
    /// Write the delivery row. Called for every inbound request that did not
    /// reserve a row up front (signature failures, duplicates), with the
    /// HTTP status actually returned.
    pub fn record_delivery(&self, rec: &DeliveryRecord) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO webhook_deliveries (id, integration_id, idempotency_key, \
             content_fingerprint, payload, headers, http_status, error, alert_id, processed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rec.id,
                rec.integration_id,
                rec.idempotency_key,
                rec.content_fingerprint,
                rec.payload,
                rec.headers,
                rec.http_status,
                rec.error,
                rec.alert_id,
                rec.processed_at,
            ],
        )?;
        Ok(())
    }

    /// Duplicate probe and row reservation in one transaction.
    ///
    /// Matches prior deliveries by idempotency key when one is present,
    /// otherwise by content fingerprint, both inside the window. Rows that
    /// produced an alert count, and so do still-pending reservations, which
    /// is what serializes two concurrent submissions of the same payload:
    /// exactly one of them reserves, the other sees the reservation.
    ///
    /// Returns the duplicate information, or None after reserving `rec` as
    /// an in-flight row (to be completed with `finalize_delivery`).
    pub fn reserve_delivery_if_new(
        &self,
        rec: &DeliveryRecord,
        window_minutes: i64,
    ) -> Result<Option<DuplicateCheck>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::minutes(window_minutes)).to_rfc3339();
        let mut db = self.db.lock();
        let tx = db.transaction()?;

        let found = match &rec.idempotency_key {
            Some(key) => tx
                .query_row(
                    "SELECT id, alert_id FROM webhook_deliveries \
                     WHERE integration_id = ?1 AND idempotency_key = ?2 \
                       AND (alert_id IS NOT NULL OR http_status = ?3) \
                       AND processed_at >= ?4 \
                     ORDER BY processed_at DESC LIMIT 1",
                    params![rec.integration_id, key, DELIVERY_STATUS_PENDING, cutoff],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                )
                .optional()?,
            None => tx
                .query_row(
                    "SELECT id, alert_id FROM webhook_deliveries \
                     WHERE integration_id = ?1 AND content_fingerprint = ?2 \
                       AND (alert_id IS NOT NULL OR http_status = ?3) \
                       AND processed_at >= ?4 \
                     ORDER BY processed_at DESC LIMIT 1",
                    params![
                        rec.integration_id,
                        rec.content_fingerprint,
                        DELIVERY_STATUS_PENDING,
                        cutoff
                    ],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                )
                .optional()?,
        };

        if let Some((delivery_id, alert_id)) = found {
            return Ok(Some(DuplicateCheck {
                is_duplicate: true,
                existing_alert_id: alert_id,
                existing_delivery_id: Some(delivery_id),
            }));
        }

        tx.execute(
            "INSERT INTO webhook_deliveries (id, integration_id, idempotency_key, \
             content_fingerprint, payload, headers, http_status, error, alert_id, processed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rec.id,
                rec.integration_id,
                rec.idempotency_key,
                rec.content_fingerprint,
                rec.payload,
                rec.headers,
                DELIVERY_STATUS_PENDING,
                Option::<String>::None,
                Option::<String>::None,
                rec.processed_at,
            ],
        )?;
        tx.commit()?;
        Ok(None)
    }

    /// Complete a reserved delivery row with the final outcome.
    pub fn finalize_delivery(
        &self,
        id: &str,
        http_status: i64,
        error: Option<&str>,
        alert_id: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "UPDATE webhook_deliveries SET http_status = ?2, error = ?3, alert_id = ?4 \
             WHERE id = ?1",
            params![id, http_status, error, alert_id],
        )?;
        Ok(())
    }

    pub fn list_deliveries(&self, integration_id: &str, limit: u32) -> Result<Vec<DeliveryRecord>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, integration_id, idempotency_key, content_fingerprint, payload, headers, \
             http_status, error, alert_id, processed_at \
             FROM webhook_deliveries WHERE integration_id = ?1 \
             ORDER BY processed_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![integration_id, limit], |row| {
                Ok(DeliveryRecord {
                    id: row.get(0)?,
                    integration_id: row.get(1)?,
                    idempotency_key: row.get(2)?,
                    content_fingerprint: row.get(3)?,
                    payload: row.get(4)?,
                    headers: row.get(5)?,
                    http_status: row.get(6)?,
                    error: row.get(7)?,
                    alert_id: row.get(8)?,
                    processed_at: row.get(9)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

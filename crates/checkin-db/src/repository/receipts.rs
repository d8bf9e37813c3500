//! # Receipt Outbox Repository
//!
//! Durable queue of transaction receipts waiting for a successful check-in.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  upload_transaction_receipt(r)                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO receipt_outbox (seq = max + 1)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  next check-in: pending() ──► attached to payload                      │
//! │       │                                                                 │
//! │       ├── success: remove(ids)   receipts leave the queue              │
//! │       └── failure: nothing       receipts ride along next time         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use checkin_core::{format_utc, TransactionReceipt};

use crate::error::{DbError, DbResult};

/// Repository for queued transaction receipts.
#[derive(Debug, Clone)]
pub struct ReceiptOutboxRepository {
    pool: SqlitePool,
}

impl ReceiptOutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReceiptOutboxRepository { pool }
    }

    /// Appends a receipt to the queue. Re-queuing the same id is a no-op.
    pub async fn enqueue(&self, receipt: &TransactionReceipt) -> DbResult<()> {
        let fields = serde_json::to_string(&receipt.fields)?;

        debug!(receipt_id = %receipt.id, "Queuing receipt");

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO receipt_outbox (id, fields, created_at, seq)
            VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(seq), 0) + 1 FROM receipt_outbox))
            "#,
        )
        .bind(&receipt.id)
        .bind(&fields)
        .bind(format_utc(receipt.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns queued receipts, oldest first.
    pub async fn pending(&self) -> DbResult<Vec<TransactionReceipt>> {
        let rows = sqlx::query("SELECT id, fields, created_at FROM receipt_outbox ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> DbResult<TransactionReceipt> {
                let id: String = row.try_get("id")?;
                let fields: String = row.try_get("fields")?;
                let created_at: String = row.try_get("created_at")?;

                let fields: BTreeMap<String, serde_json::Value> = serde_json::from_str(&fields)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| DbError::CorruptState(format!("receipt {}: {}", id, e)))?
                    .with_timezone(&Utc);

                Ok(TransactionReceipt {
                    id,
                    created_at,
                    fields,
                })
            })
            .collect()
    }

    /// Removes delivered receipts. Returns how many rows were deleted.
    pub async fn remove(&self, ids: &[String]) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM receipt_outbox WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        debug!(removed, "Receipts drained from outbox");
        Ok(removed)
    }

    /// Number of queued receipts.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM receipt_outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

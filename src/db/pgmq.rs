//! pgmq queue operations via direct SQLx, and the delivery channel built on
//! them.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.set_vt.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;

use super::Db;
use crate::channel::{AckHandle, Delivery, DeliveryChannel};
use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

fn count(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(self.pool())
            .await?;
        count(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(self.pool())
            .await?;
        count(queue_name, "send");
        Ok(row.0)
    }

    /// Read at most one message, hiding it for `vt_seconds`.
    /// Returns None if the queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(self.pool())
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });
        count(
            queue_name,
            if msg.is_some() { "read" } else { "read_empty" },
        );
        Ok(msg)
    }

    /// Archive a message (moves to archive table, preserves for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        let (archived,): (bool,) = sqlx::query_as("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(self.pool())
            .await?;
        if !archived {
            return Err(Error::NotFound(format!("message {msg_id} in {queue_name}")));
        }
        count(queue_name, "archive");
        Ok(())
    }

    /// Make a read message visible again after `vt_offset` seconds.
    pub async fn set_visibility(&self, queue_name: &str, msg_id: i64, vt_offset: i32) -> Result<()> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_offset)
            .fetch_optional(self.pool())
            .await?;
        if row.is_none() {
            return Err(Error::NotFound(format!("message {msg_id} in {queue_name}")));
        }
        count(queue_name, "set_vt");
        Ok(())
    }
}

/// Delivery channel on pgmq.
///
/// A read message is hidden for `visibility_timeout` seconds; if its consumer
/// dies without settling it, pgmq hands it out again after that.
pub struct PgmqChannel {
    db: Arc<Db>,
    visibility_timeout: i32,
}

impl PgmqChannel {
    pub fn new(db: Arc<Db>, visibility_timeout: i32) -> Self {
        Self {
            db,
            visibility_timeout,
        }
    }
}

#[async_trait]
impl DeliveryChannel for PgmqChannel {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.db.create_queue(queue).await
    }

    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<()> {
        self.db.send_to_queue(queue, payload, 0).await.map(|_| ())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let msg = self
            .db
            .read_from_queue(queue, self.visibility_timeout)
            .await?;
        Ok(msg.map(|m| Delivery {
            handle: AckHandle {
                queue: queue.to_string(),
                tag: m.msg_id,
            },
            payload: m.message,
            delivery_count: m.read_ct.max(1) as u32,
        }))
    }

    async fn ack(&self, handle: &AckHandle) -> Result<()> {
        self.db.archive_message(&handle.queue, handle.tag).await
    }

    async fn nack(&self, handle: &AckHandle, redeliver: bool) -> Result<()> {
        if redeliver {
            self.db.set_visibility(&handle.queue, handle.tag, 0).await
        } else {
            // Rejected payloads are archived, not deleted: they stay auditable.
            self.db.archive_message(&handle.queue, handle.tag).await
        }
    }

    async fn close(&self) {
        self.db.close().await;
    }
}

//! The producer: persists tasks, then publishes references to them.
//!
//! The store insert always happens before the publish, so no consumer can
//! see a reference to a task that is not yet durable. The two steps are not
//! transactional: if the publish fails, the task stays PENDING with nothing
//! in flight for it, and the failure is recorded in its audit log.
//!
//! Once the insert succeeds, audit writes are best-effort. A failed log write
//! never stops the publish, since a later `submit` of the same id is a no-op
//! and could not send it.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde_json::json;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::channel::DeliveryChannel;
use crate::error::Result;
use crate::model::{Component, NewLogEntry, NewTask, TaskId, TaskRef, TaskStatus};
use crate::store::TaskStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_status, start_task_span};

/// Tally of a [`Producer::submit_all`] batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    /// Created and enqueued.
    pub created: usize,
    /// Already present, left untouched.
    pub skipped: usize,
    /// Invalid, not stored, or stored but not enqueued.
    pub failed: Vec<TaskId>,
}

pub struct Producer {
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn DeliveryChannel>,
    queue_name: String,
}

impl Producer {
    /// Declare the queue and return a producer publishing to it.
    pub async fn connect(
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn DeliveryChannel>,
        queue_name: impl Into<String>,
    ) -> Result<Self> {
        let queue_name = queue_name.into();
        channel.declare(&queue_name).await?;
        Ok(Self {
            store,
            channel,
            queue_name,
        })
    }

    /// Create and enqueue a task.
    ///
    /// Returns `false` without side effects if `task_id` already exists.
    /// If the publish fails, the error is logged against the task and
    /// returned; the task itself stays PENDING.
    pub async fn submit(&self, task: NewTask) -> Result<bool> {
        task.validate()?;
        let task_id = task.task_id().clone();
        let span = start_task_span(Component::Producer, &task_id);
        self.register_and_publish(&task, task_id, &span)
            .instrument(span.clone())
            .await
    }

    async fn register_and_publish(
        &self,
        task: &NewTask,
        task_id: TaskId,
        span: &Span,
    ) -> Result<bool> {
        if self.store.task_exists(&task_id).await? || !self.store.insert_task(task).await? {
            debug!(task_id = %task_id, "task already registered, skipping");
            count("duplicate");
            return Ok(false);
        }
        record_status(span, TaskStatus::Pending);
        self.record(NewLogEntry::info(
            task_id.clone(),
            Component::Producer,
            "registered as PENDING",
        ))
        .await;

        let payload = TaskRef::new(task_id.clone()).to_payload()?;
        match self.channel.publish(&self.queue_name, &payload).await {
            Ok(()) => {
                self.record(
                    NewLogEntry::info(task_id.clone(), Component::Producer, "sent to channel")
                        .details(json!({ "queue": self.queue_name, "payload": payload })),
                )
                .await;
                info!(task_id = %task_id, queue = %self.queue_name, "task enqueued");
                count("created");
                Ok(true)
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "publish failed, task left PENDING");
                let entry = NewLogEntry::error(
                    task_id.clone(),
                    Component::Producer,
                    "publish to channel failed",
                )
                .details(json!({ "queue": self.queue_name, "error": e.to_string() }));
                self.record(entry).await;
                count("publish_failed");
                Err(e)
            }
        }
    }

    /// Append an audit entry, logging instead of failing if the store refuses.
    async fn record(&self, entry: NewLogEntry) {
        let task_id = entry.task_id().clone();
        if let Err(e) = self.store.append_log(entry).await {
            warn!(task_id = %task_id, error = %e, "could not write audit log entry");
        }
    }

    /// Submit each task in turn. One failure does not stop the batch.
    pub async fn submit_all(&self, tasks: impl IntoIterator<Item = NewTask>) -> SubmitSummary {
        let mut summary = SubmitSummary::default();
        for task in tasks {
            let task_id = task.task_id().clone();
            match self.submit(task).await {
                Ok(true) => summary.created += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "task not submitted");
                    summary.failed.push(task_id);
                }
            }
        }
        info!(
            created = summary.created,
            skipped = summary.skipped,
            failed = summary.failed.len(),
            "batch submitted"
        );
        summary
    }

    /// Close the channel and the store.
    pub async fn close(&self) {
        self.channel.close().await;
        self.store.close().await;
    }
}

fn count(result: &'static str) {
    metrics::tasks_submitted().add(1, &[KeyValue::new("result", result)]);
}

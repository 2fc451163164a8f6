//! The agent: consumes task references, harvests, records the outcome.
//!
//! Per delivery the agent commits the task's terminal status, then writes
//! the audit entry, and only then acknowledges. A crash anywhere before the
//! ack leaves the message to be redelivered; the store's conditional
//! updates turn that redelivery into a no-op once the task is terminal.

pub mod backoff;
pub mod classify;
pub mod harvest;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::channel::{Delivery, DeliveryChannel};
use crate::config::DEFAULT_QUEUE;
use crate::error::{Error, Result};
use crate::model::{Component, NewLogEntry, TaskId, TaskRef, TaskStatus};
use crate::store::{Claim, StatusUpdate, TaskStore};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_status, record_status_transition, start_task_span};

pub use backoff::Backoff;
pub use classify::{WorkFailure, classify};
pub use harvest::{Harvester, SimulatedHarvester};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub queue_name: String,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// First reconnect delay; doubles up to `reconnect_max`.
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE.to_string(),
            poll_interval: Duration::from_secs(1),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// How a delivery is settled on the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Handled (or safely ignorable). Remove from the channel.
    Ack,
    /// Corrupt payload. Drop without redelivery.
    Reject,
    /// Not handled. Put back for redelivery.
    Requeue,
}

impl AckDecision {
    fn as_str(self) -> &'static str {
        match self {
            AckDecision::Ack => "ack",
            AckDecision::Reject => "reject",
            AckDecision::Requeue => "requeue",
        }
    }
}

/// A single-consumer worker. At most one delivery is in flight at a time.
#[derive(Clone)]
pub struct Agent {
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn DeliveryChannel>,
    harvester: Arc<dyn Harvester>,
    config: AgentConfig,
    shutdown: Arc<Notify>,
}

impl Agent {
    pub fn new(
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn DeliveryChannel>,
        harvester: Arc<dyn Harvester>,
        config: AgentConfig,
    ) -> Self {
        Self {
            store,
            channel,
            harvester,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Ask the run loop to stop. Safe to call before `run` starts.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Close the channel and the store. Unsettled deliveries are left to the
    /// channel's redelivery.
    pub async fn close(&self) {
        self.channel.close().await;
        self.store.close().await;
        info!("agent connections closed");
    }

    /// Consume until shutdown.
    ///
    /// Transport failures never end the loop: the agent backs off,
    /// re-declares the queue and resumes.
    pub async fn run(&self) -> Result<()> {
        let queue = self.config.queue_name.as_str();
        let mut backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);

        if let Err(e) = self.channel.declare(queue).await {
            warn!(queue, error = %e, "could not declare queue");
            if !self.reconnect(&mut backoff).await {
                return Ok(());
            }
        }
        info!(queue, "agent started, waiting for tasks");

        loop {
            let received = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("agent shutting down");
                    return Ok(());
                }
                received = self.channel.receive(queue) => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    if !self.pause(self.config.poll_interval).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) if e.is_transient() => {
                    warn!(queue, error = %e, "lost connection to channel");
                    if !self.reconnect(&mut backoff).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.process_delivery(delivery).await {
                Ok(AckDecision::Requeue) => {
                    // The store is failing; don't spin on the same message.
                    if !self.pause(backoff.next_delay()).await {
                        return Ok(());
                    }
                }
                Ok(_) => backoff.reset(),
                Err(e) if e.is_transient() => {
                    warn!(queue, error = %e, "could not settle delivery, reconnecting");
                    if !self.reconnect(&mut backoff).await {
                        return Ok(());
                    }
                }
                Err(e) => warn!(queue, error = %e, "could not settle delivery"),
            }
        }
    }

    /// Handle one delivery and settle it. Errors are settlement failures only.
    pub async fn process_delivery(&self, delivery: Delivery) -> Result<AckDecision> {
        let decision = match self.handle_message(&delivery.payload).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    tag = delivery.handle.tag,
                    error = %e,
                    "store write failed, leaving message for redelivery"
                );
                AckDecision::Requeue
            }
        };

        match decision {
            AckDecision::Ack => self.channel.ack(&delivery.handle).await?,
            AckDecision::Reject => self.channel.nack(&delivery.handle, false).await?,
            AckDecision::Requeue => self.channel.nack(&delivery.handle, true).await?,
        }
        metrics::deliveries().add(1, &[KeyValue::new("decision", decision.as_str())]);
        debug!(
            tag = delivery.handle.tag,
            redelivered = delivery.redelivered(),
            decision = decision.as_str(),
            "delivery settled"
        );
        Ok(decision)
    }

    /// Decide what to do with one payload, doing all store work first.
    ///
    /// Returns `Err` only for store failures; the caller must then not ack.
    pub async fn handle_message(&self, payload: &serde_json::Value) -> Result<AckDecision> {
        let task_ref = match TaskRef::from_payload(payload) {
            Ok(task_ref) => task_ref,
            Err(e) => {
                warn!(%payload, error = %e, "malformed task reference, rejecting");
                return Ok(AckDecision::Reject);
            }
        };

        let span = start_task_span(Component::Agent, &task_ref.task_id);
        self.handle_task(task_ref.task_id, &span)
            .instrument(span.clone())
            .await
    }

    async fn handle_task(&self, task_id: TaskId, span: &Span) -> Result<AckDecision> {
        let task = match self.store.begin_processing(&task_id, Utc::now()).await? {
            Claim::Started(task) => task,
            Claim::Missing => {
                warn!(task_id = %task_id, "no such task in store, dropping orphaned reference");
                return Ok(AckDecision::Ack);
            }
            Claim::Terminal(status) => {
                info!(task_id = %task_id, %status, "task already finished, acknowledging duplicate");
                return Ok(AckDecision::Ack);
            }
        };
        record_status(span, TaskStatus::InProgress);

        self.store
            .append_log(
                NewLogEntry::info(task_id.clone(), Component::Agent, "processing started").details(
                    json!({
                        "resource_sku": task.resource_sku,
                        "vendor_url": task.vendor_url,
                    }),
                ),
            )
            .await?;
        info!(sku = %task.resource_sku, vendor = %task.vendor_url, "harvesting");

        let started = Instant::now();
        let outcome = self.harvester.harvest(&task).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (update, entry) = match outcome {
            Ok(result) => (
                StatusUpdate::done(result.clone()),
                NewLogEntry::info(task_id.clone(), Component::Agent, "harvest completed")
                    .details(result),
            ),
            Err(failure) => {
                let status = classify(&failure);
                warn!(%status, error = %failure, "harvest failed");
                (
                    StatusUpdate::failed(status, failure.to_string()),
                    NewLogEntry::error(
                        task_id.clone(),
                        Component::Agent,
                        format!("harvest failed: {failure}"),
                    )
                    .details(json!({
                        "error": failure.description(),
                        "status": status,
                    })),
                )
            }
        };
        let status = update.status();

        match self.store.update_status(&task_id, update).await {
            Ok(_) => {}
            Err(Error::InvalidTransition { from, .. }) => {
                // A concurrent redelivery committed first.
                info!(task_id = %task_id, %from, "task finished by another delivery");
                return Ok(AckDecision::Ack);
            }
            Err(e) => return Err(e),
        }
        record_status_transition(span, TaskStatus::InProgress, status);
        metrics::harvest_duration_ms()
            .record(elapsed_ms, &[KeyValue::new("status", status.as_str())]);

        self.store.append_log(entry).await?;
        Ok(AckDecision::Ack)
    }

    /// Retry `declare` with backoff until it succeeds. `false` on shutdown.
    async fn reconnect(&self, backoff: &mut Backoff) -> bool {
        let queue = self.config.queue_name.as_str();
        loop {
            let delay = backoff.next_delay();
            info!(queue, delay_ms = delay.as_millis() as u64, "reconnecting to channel");
            if !self.pause(delay).await {
                return false;
            }
            match self.channel.declare(queue).await {
                Ok(()) => {
                    info!(queue, "reconnected, resuming consumption");
                    backoff.reset();
                    return true;
                }
                Err(e) => warn!(queue, error = %e, "reconnect attempt failed"),
            }
        }
    }

    /// Sleep unless shutdown arrives first. `false` on shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("agent shutting down");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

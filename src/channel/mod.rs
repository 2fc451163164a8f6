//! The delivery channel contract.
//!
//! A durable, at-least-once queue of task references. A received message is
//! invisible to other consumers until it is acknowledged (gone for good),
//! negatively acknowledged, or its consumer disconnects (redelivered).

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::{ChannelStats, MemoryChannel};

/// Identifies one delivered message for ack/nack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckHandle {
    pub queue: String,
    pub tag: i64,
}

/// A message handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub handle: AckHandle,
    pub payload: serde_json::Value,
    /// How many times this message has been handed out, this one included.
    pub delivery_count: u32,
}

impl Delivery {
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Durable at-least-once transport for task references.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Create the durable queue if it does not exist. Safe to repeat.
    async fn declare(&self, queue: &str) -> Result<()>;

    /// Enqueue a persistent message.
    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<()>;

    /// Take the next message, if any, with a credit of one: the caller must
    /// settle it before the next `receive` is meaningful.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Settle a message as handled. It will not be delivered again.
    async fn ack(&self, handle: &AckHandle) -> Result<()>;

    /// Settle a message as not handled. With `redeliver` it goes back on the
    /// queue; without, it is dropped from delivery.
    async fn nack(&self, handle: &AckHandle, redeliver: bool) -> Result<()>;

    /// Close the connection. Unsettled messages become deliverable again.
    async fn close(&self);
}

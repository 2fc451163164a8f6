//! In-process delivery channel with fault injection, for tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AckHandle, Delivery, DeliveryChannel};
use crate::error::{Error, Result};

/// Counters over the lifetime of a [`MemoryChannel`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub declared: usize,
    pub published: usize,
    pub delivered: usize,
    pub acked: usize,
    pub rejected: usize,
    pub requeued: usize,
}

#[derive(Debug, Clone)]
struct Message {
    tag: i64,
    payload: serde_json::Value,
    delivery_count: u32,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, Message>,
    dead: Vec<serde_json::Value>,
}

impl Queue {
    /// Return every unsettled message to the head of the queue, oldest first.
    fn requeue_in_flight(&mut self) {
        let mut returned: Vec<Message> = self.in_flight.drain().map(|(_, m)| m).collect();
        returned.sort_by_key(|m| std::cmp::Reverse(m.tag));
        for message in returned {
            self.ready.push_front(message);
        }
    }
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, Queue>,
    next_tag: i64,
    fail_receives: usize,
    fail_publishes: usize,
    closed: bool,
    stats: ChannelStats,
}

impl Inner {
    fn queue(&mut self, name: &str) -> Result<&mut Queue> {
        if self.closed {
            return Err(Error::Transport("channel closed".to_string()));
        }
        self.queues
            .get_mut(name)
            .ok_or_else(|| Error::Transport(format!("queue {name} not declared")))
    }
}

/// Delivery channel held in memory.
#[derive(Default)]
pub struct MemoryChannel {
    inner: Mutex<Inner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> ChannelStats {
        self.inner.lock().await.stats.clone()
    }

    /// Messages waiting to be delivered.
    pub async fn ready_len(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled.
    pub async fn in_flight_len(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.in_flight.len())
    }

    /// Payloads rejected without redelivery.
    pub async fn dead_letters(&self, queue: &str) -> Vec<serde_json::Value> {
        self.inner
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.dead.clone())
            .unwrap_or_default()
    }

    /// Simulate a dropped connection: unsettled messages become deliverable
    /// again and the next receive fails with a transport error.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        for queue in inner.queues.values_mut() {
            queue.requeue_in_flight();
        }
        inner.fail_receives += 1;
    }

    pub async fn fail_next_receives(&self, n: usize) {
        self.inner.lock().await.fail_receives += n;
    }

    pub async fn fail_next_publishes(&self, n: usize) {
        self.inner.lock().await.fail_publishes += n;
    }
}

#[async_trait]
impl DeliveryChannel for MemoryChannel {
    async fn declare(&self, queue: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::Transport("channel closed".to_string()));
        }
        inner.queues.entry(queue.to_string()).or_default();
        inner.stats.declared += 1;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_publishes > 0 {
            inner.fail_publishes -= 1;
            return Err(Error::Transport("publish refused: broker unreachable".to_string()));
        }
        inner.next_tag += 1;
        let tag = inner.next_tag;
        inner.queue(queue)?.ready.push_back(Message {
            tag,
            payload: payload.clone(),
            delivery_count: 0,
        });
        inner.stats.published += 1;
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock().await;
        if inner.fail_receives > 0 {
            inner.fail_receives -= 1;
            return Err(Error::Transport("connection reset by broker".to_string()));
        }
        let q = inner.queue(queue)?;
        let Some(mut message) = q.ready.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;
        let delivery = Delivery {
            handle: AckHandle {
                queue: queue.to_string(),
                tag: message.tag,
            },
            payload: message.payload.clone(),
            delivery_count: message.delivery_count,
        };
        q.in_flight.insert(message.tag, message);
        inner.stats.delivered += 1;
        Ok(Some(delivery))
    }

    async fn ack(&self, handle: &AckHandle) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .queue(&handle.queue)?
            .in_flight
            .remove(&handle.tag)
            .ok_or_else(|| Error::NotFound(format!("delivery tag {}", handle.tag)))?;
        inner.stats.acked += 1;
        Ok(())
    }

    async fn nack(&self, handle: &AckHandle, redeliver: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let q = inner.queue(&handle.queue)?;
        let message = q
            .in_flight
            .remove(&handle.tag)
            .ok_or_else(|| Error::NotFound(format!("delivery tag {}", handle.tag)))?;
        if redeliver {
            q.ready.push_front(message);
            inner.stats.requeued += 1;
        } else {
            q.dead.push(message.payload);
            inner.stats.rejected += 1;
        }
        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().await;
        for queue in inner.queues.values_mut() {
            queue.requeue_in_flight();
        }
        inner.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const Q: &str = "tasks";

    async fn declared() -> MemoryChannel {
        let channel = MemoryChannel::new();
        channel.declare(Q).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn undeclared_queue_is_a_transport_error() {
        let channel = MemoryChannel::new();
        let err = channel.publish(Q, &json!({})).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let channel = declared().await;
        channel.publish(Q, &json!({"task_id": "a"})).await.unwrap();
        channel.publish(Q, &json!({"task_id": "b"})).await.unwrap();

        let first = channel.receive(Q).await.unwrap().unwrap();
        assert_eq!(first.payload["task_id"], "a");
        channel.ack(&first.handle).await.unwrap();

        let second = channel.receive(Q).await.unwrap().unwrap();
        assert_eq!(second.payload["task_id"], "b");
        assert!(!second.redelivered());
    }

    #[tokio::test]
    async fn acked_message_is_gone() {
        let channel = declared().await;
        channel.publish(Q, &json!({"task_id": "a"})).await.unwrap();
        let d = channel.receive(Q).await.unwrap().unwrap();
        channel.ack(&d.handle).await.unwrap();

        assert!(channel.receive(Q).await.unwrap().is_none());
        assert_eq!(channel.in_flight_len(Q).await, 0);
        assert!(channel.ack(&d.handle).await.is_err());
    }

    #[tokio::test]
    async fn nack_with_redeliver_returns_message() {
        let channel = declared().await;
        channel.publish(Q, &json!({"task_id": "a"})).await.unwrap();
        let d = channel.receive(Q).await.unwrap().unwrap();
        channel.nack(&d.handle, true).await.unwrap();

        let again = channel.receive(Q).await.unwrap().unwrap();
        assert_eq!(again.payload["task_id"], "a");
        assert!(again.redelivered());
    }

    #[tokio::test]
    async fn nack_without_redeliver_dead_letters() {
        let channel = declared().await;
        channel.publish(Q, &json!("garbage")).await.unwrap();
        let d = channel.receive(Q).await.unwrap().unwrap();
        channel.nack(&d.handle, false).await.unwrap();

        assert!(channel.receive(Q).await.unwrap().is_none());
        assert_eq!(channel.dead_letters(Q).await, vec![json!("garbage")]);
        assert_eq!(channel.stats().await.rejected, 1);
    }

    #[tokio::test]
    async fn disconnect_redelivers_unsettled_messages() {
        let channel = declared().await;
        channel.publish(Q, &json!({"task_id": "a"})).await.unwrap();
        channel.publish(Q, &json!({"task_id": "b"})).await.unwrap();
        let d = channel.receive(Q).await.unwrap().unwrap();
        assert_eq!(d.payload["task_id"], "a");

        channel.disconnect().await;
        assert!(channel.receive(Q).await.unwrap_err().is_transient());

        let again = channel.receive(Q).await.unwrap().unwrap();
        assert_eq!(again.payload["task_id"], "a");
        assert_eq!(again.delivery_count, 2);
    }
}

//! Producer registration and publishing against in-memory backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvestq::channel::{AckHandle, Delivery, DeliveryChannel, MemoryChannel};
use harvestq::error::{Error, Result};
use harvestq::model::*;
use harvestq::producer::{Producer, SubmitSummary};
use harvestq::store::{Claim, MemoryStore, StatusUpdate, TaskStore};
use serde_json::json;

const Q: &str = "harvest_tasks";

async fn setup() -> (Arc<MemoryStore>, Arc<MemoryChannel>, Producer) {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(MemoryChannel::new());
    let producer = Producer::connect(store.clone(), channel.clone(), Q)
        .await
        .unwrap();
    (store, channel, producer)
}

fn t1() -> NewTask {
    NewTask::new("T1", "GALACTIC_CRYSTAL_X", "https://vendorA.example.com")
}

#[tokio::test]
async fn connect_declares_queue() {
    let (_store, channel, _producer) = setup().await;
    assert_eq!(channel.stats().await.declared, 1);
}

#[tokio::test]
async fn submit_registers_pending_then_publishes_reference() {
    let (store, channel, producer) = setup().await;

    assert!(producer.submit(t1().priority(3)).await.unwrap());

    let task = store.get_task(&TaskId::from("T1")).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.priority, 3);
    assert!(task.started_at.is_none());
    assert!(task.result.is_none());

    let delivery = channel.receive(Q).await.unwrap().unwrap();
    assert_eq!(delivery.payload, json!({"task_id": "T1"}));

    let logs = store.list_logs(&TaskId::from("T1")).await.unwrap();
    let messages: Vec<_> = logs.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["registered as PENDING", "sent to channel"]);
    assert!(logs.iter().all(|e| e.component == Component::Producer));
    assert_eq!(logs[1].details.as_ref().unwrap()["queue"], Q);
}

#[tokio::test]
async fn resubmitting_an_id_changes_nothing() {
    let (store, channel, producer) = setup().await;

    assert!(producer.submit(t1()).await.unwrap());
    let writes = store.write_count().await;
    let other = NewTask::new("T1", "SOMETHING_ELSE", "https://vendorB.example.com");
    assert!(!producer.submit(other).await.unwrap());

    assert_eq!(store.write_count().await, writes);
    assert_eq!(channel.stats().await.published, 1);
    let task = store.get_task(&TaskId::from("T1")).await.unwrap().unwrap();
    assert_eq!(task.resource_sku, "GALACTIC_CRYSTAL_X");
}

#[tokio::test]
async fn invalid_task_touches_nothing() {
    let (store, channel, producer) = setup().await;

    for task in [
        NewTask::new("", "SKU", "https://v.example.com"),
        NewTask::new("T1", "  ", "https://v.example.com"),
        NewTask::new("T1", "SKU", ""),
    ] {
        let err = producer.submit(task).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    assert_eq!(store.write_count().await, 0);
    assert_eq!(channel.stats().await.published, 0);
}

#[tokio::test]
async fn publish_failure_leaves_task_pending_and_logged() {
    let (store, channel, producer) = setup().await;
    channel.fail_next_publishes(1).await;

    let err = producer.submit(t1()).await.unwrap_err();
    assert!(err.is_transient());

    let task = store.get_task(&TaskId::from("T1")).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(channel.ready_len(Q).await, 0);

    let logs = store.list_logs(&TaskId::from("T1")).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].level, LogLevel::Error);
    assert_eq!(logs[1].component, Component::Producer);
    assert!(logs[1].details.as_ref().unwrap()["error"].is_string());
}

#[tokio::test]
async fn batch_reports_each_outcome() {
    let (store, channel, producer) = setup().await;
    producer.submit(t1()).await.unwrap();

    let summary = producer
        .submit_all([
            NewTask::new("T2", "SKU_NO_ENCONTRADO", "https://vendorA.example.com"),
            t1(),
            NewTask::new("bad", "", "https://vendorA.example.com"),
            NewTask::new("T3", "NEBULA_DUST_7", "https://vendorB.example.com"),
        ])
        .await;

    assert_eq!(
        summary,
        SubmitSummary {
            created: 2,
            skipped: 1,
            failed: vec![TaskId::from("bad")],
        }
    );
    assert_eq!(channel.ready_len(Q).await, 3);
    assert!(!store.task_exists(&TaskId::from("bad")).await.unwrap());
}

#[tokio::test]
async fn batch_continues_past_publish_failure() {
    let (store, channel, producer) = setup().await;
    channel.fail_next_publishes(1).await;

    let summary = producer
        .submit_all([
            NewTask::new("a", "ALPHA", "https://v.example.com"),
            NewTask::new("b", "BETA", "https://v.example.com"),
        ])
        .await;

    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, vec![TaskId::from("a")]);
    assert!(store.task_exists(&TaskId::from("a")).await.unwrap());
    assert_eq!(channel.ready_len(Q).await, 1);
}

/// Stores tasks normally but refuses every audit log write.
struct LogRefusingStore {
    inner: MemoryStore,
}

#[async_trait]
impl TaskStore for LogRefusingStore {
    async fn insert_task(&self, task: &NewTask) -> Result<bool> {
        self.inner.insert_task(task).await
    }
    async fn task_exists(&self, task_id: &TaskId) -> Result<bool> {
        self.inner.task_exists(task_id).await
    }
    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        self.inner.get_task(task_id).await
    }
    async fn begin_processing(&self, id: &TaskId, at: DateTime<Utc>) -> Result<Claim> {
        self.inner.begin_processing(id, at).await
    }
    async fn update_status(&self, id: &TaskId, update: StatusUpdate) -> Result<Task> {
        self.inner.update_status(id, update).await
    }
    async fn append_log(&self, _entry: NewLogEntry) -> Result<LogEntry> {
        Err(Error::Other("task_logs unavailable".to_string()))
    }
    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<LogEntry>> {
        self.inner.list_logs(task_id).await
    }
    async fn list_tasks(&self, s: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        self.inner.list_tasks(s, limit).await
    }
    async fn close(&self) {}
}

#[tokio::test]
async fn failed_audit_write_does_not_strand_stored_task() {
    let store = Arc::new(LogRefusingStore {
        inner: MemoryStore::new(),
    });
    let channel = Arc::new(MemoryChannel::new());
    let producer = Producer::connect(store.clone(), channel.clone(), Q)
        .await
        .unwrap();

    assert!(producer.submit(t1()).await.unwrap());

    let task = store.get_task(&TaskId::from("T1")).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    let delivery = channel.receive(Q).await.unwrap().unwrap();
    assert_eq!(delivery.payload, json!({"task_id": "T1"}));
}

/// Records whether each published task was already in the store.
struct StoreCheckingChannel {
    store: Arc<MemoryStore>,
    inner: MemoryChannel,
    saw_unstored: AtomicBool,
}

#[async_trait]
impl DeliveryChannel for StoreCheckingChannel {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.inner.declare(queue).await
    }
    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> Result<()> {
        let task_ref = TaskRef::from_payload(payload)?;
        if !self.store.task_exists(&task_ref.task_id).await? {
            self.saw_unstored.store(true, Ordering::SeqCst);
        }
        self.inner.publish(queue, payload).await
    }
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        self.inner.receive(queue).await
    }
    async fn ack(&self, handle: &AckHandle) -> Result<()> {
        self.inner.ack(handle).await
    }
    async fn nack(&self, handle: &AckHandle, redeliver: bool) -> Result<()> {
        self.inner.nack(handle, redeliver).await
    }
    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test]
async fn task_is_durable_before_its_reference_is_published() {
    let store = Arc::new(MemoryStore::new());
    let channel = Arc::new(StoreCheckingChannel {
        store: store.clone(),
        inner: MemoryChannel::new(),
        saw_unstored: AtomicBool::new(false),
    });
    let producer = Producer::connect(store.clone(), channel.clone(), Q)
        .await
        .unwrap();

    producer
        .submit_all((0..5).map(|i| NewTask::new(format!("t{i}"), "SKU", "https://v.example.com")))
        .await;

    assert!(!channel.saw_unstored.load(Ordering::SeqCst));
    assert_eq!(channel.inner.stats().await.published, 5);
}

#[tokio::test]
async fn close_releases_channel() {
    let (_store, channel, producer) = setup().await;
    producer.close().await;
    assert!(producer.submit(t1()).await.is_err());
    assert_eq!(channel.stats().await.published, 0);
}

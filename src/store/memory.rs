//! In-process task store for tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Claim, StatusUpdate, TaskStore};
use crate::error::{Error, Result};
use crate::model::{LogEntry, NewLogEntry, NewTask, Task, TaskId, TaskStatus};

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    logs: Vec<LogEntry>,
    writes: usize,
}

/// Task store held in memory. One mutex makes every call atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutating calls so far.
    pub async fn write_count(&self) -> usize {
        self.inner.lock().await.writes
    }

    /// Every log entry across all tasks, in append order.
    pub async fn all_logs(&self) -> Vec<LogEntry> {
        self.inner.lock().await.logs.clone()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &NewTask) -> Result<bool> {
        task.validate()?;
        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(task.task_id()) {
            return Ok(false);
        }
        inner
            .tasks
            .insert(task.task_id().clone(), task.clone().into_task());
        inner.writes += 1;
        Ok(true)
    }

    async fn task_exists(&self, task_id: &TaskId) -> Result<bool> {
        Ok(self.inner.lock().await.tasks.contains_key(task_id))
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        Ok(self.inner.lock().await.tasks.get(task_id).cloned())
    }

    async fn begin_processing(
        &self,
        task_id: &TaskId,
        started_at: DateTime<Utc>,
    ) -> Result<Claim> {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Ok(Claim::Missing);
        };
        if task.status.is_terminal() {
            return Ok(Claim::Terminal(task.status));
        }
        task.status = TaskStatus::InProgress;
        task.started_at = Some(started_at);
        let task = task.clone();
        inner.writes += 1;
        Ok(Claim::Started(task))
    }

    async fn update_status(&self, task_id: &TaskId, update: StatusUpdate) -> Result<Task> {
        update.validate()?;
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;

        if !task.status.can_transition_to(update.status()) {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: update.status().to_string(),
            });
        }

        task.completed_at = Some(update.completed_at());
        match update {
            StatusUpdate::Done { result, .. } => {
                task.status = TaskStatus::Done;
                task.result = Some(result);
                task.error_message = None;
            }
            StatusUpdate::Failed {
                status,
                error_message,
                ..
            } => {
                task.status = status;
                task.result = None;
                task.error_message = Some(error_message);
            }
        }
        let task = task.clone();
        inner.writes += 1;
        Ok(task)
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let mut inner = self.inner.lock().await;
        if !inner.tasks.contains_key(entry.task_id()) {
            return Err(Error::NotFound(format!("task {}", entry.task_id())));
        }
        let entry = entry.into_entry(Utc::now());
        inner.logs.push(entry.clone());
        inner.writes += 1;
        Ok(entry)
    }

    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<LogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .iter()
            .filter(|entry| &entry.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| status.is_none_or(|s| task.status == s))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        tasks.truncate(limit.max(0) as usize);
        Ok(tasks)
    }

    async fn close(&self) {}
}

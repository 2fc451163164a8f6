//! The task store contract.
//!
//! The store exclusively owns persisted task and log state. Every call is
//! atomic on its own; monotonic status progression is enforced by
//! conditional updates, not by callers reading first.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{LogEntry, NewLogEntry, NewTask, Task, TaskId, TaskStatus};

pub use memory::MemoryStore;

/// Outcome of trying to move a task into `IN_PROGRESS`.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The task is now `IN_PROGRESS` (fresh or re-entered after redelivery).
    Started(Task),
    /// The task already reached this terminal status; nothing was written.
    Terminal(TaskStatus),
    /// No such task; nothing was written.
    Missing,
}

/// A terminal status write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Done {
        result: serde_json::Value,
        completed_at: DateTime<Utc>,
    },
    Failed {
        status: TaskStatus,
        error_message: String,
        completed_at: DateTime<Utc>,
    },
}

impl StatusUpdate {
    pub fn done(result: serde_json::Value) -> Self {
        StatusUpdate::Done {
            result,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(status: TaskStatus, error_message: impl Into<String>) -> Self {
        StatusUpdate::Failed {
            status,
            error_message: error_message.into(),
            completed_at: Utc::now(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            StatusUpdate::Done { .. } => TaskStatus::Done,
            StatusUpdate::Failed { status, .. } => *status,
        }
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        match self {
            StatusUpdate::Done { completed_at, .. } | StatusUpdate::Failed { completed_at, .. } => {
                *completed_at
            }
        }
    }

    /// A failure update must carry one of the error statuses.
    pub fn validate(&self) -> Result<()> {
        match self {
            StatusUpdate::Failed { status, .. } if !status.is_error() => {
                Err(Error::InvalidTransition {
                    from: TaskStatus::InProgress.to_string(),
                    to: status.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Durable, transactional record of tasks and their audit logs.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a PENDING task. Returns `false` if the id already exists.
    async fn insert_task(&self, task: &NewTask) -> Result<bool>;

    async fn task_exists(&self, task_id: &TaskId) -> Result<bool>;

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Atomically move a non-terminal task to `IN_PROGRESS`, stamping
    /// `started_at`. Terminal and missing tasks are left untouched.
    async fn begin_processing(&self, task_id: &TaskId, started_at: DateTime<Utc>)
    -> Result<Claim>;

    /// Atomically move an `IN_PROGRESS` task to a terminal status.
    ///
    /// Fails with [`Error::InvalidTransition`] if the task is in any other
    /// status, and with [`Error::NotFound`] if it does not exist.
    async fn update_status(&self, task_id: &TaskId, update: StatusUpdate) -> Result<Task>;

    /// Append an audit entry. Entries are never mutated.
    async fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry>;

    /// Audit trail of a task, oldest first.
    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<LogEntry>>;

    /// Tasks by priority (highest first), then age.
    async fn list_tasks(&self, status: Option<TaskStatus>, limit: i64) -> Result<Vec<Task>>;

    /// Release connections. Further calls may fail.
    async fn close(&self);
}

//! Task records, lifecycle status, and the channel reference payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// The authoritative record of one task, as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub resource_sku: String,
    pub vendor_url: String,
    pub priority: i16,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Harvest output. Set only when status is `Done`.
    pub result: Option<serde_json::Value>,

    /// Failure description. Set only when status is an error status.
    pub error_message: Option<String>,
}

/// Producer-assigned task identifier. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Persisted by the producer, not yet picked up.
    Pending,
    /// An agent is harvesting it.
    InProgress,
    /// Harvested successfully. Terminal.
    Done,
    /// Vendor unreachable. Terminal.
    NetworkError,
    /// Vendor has no such SKU. Terminal.
    SkuNotFound,
    /// Detail page could not be parsed. Terminal.
    DetailPageError,
    /// Anything else. Terminal.
    UnknownError,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::NetworkError,
        TaskStatus::SkuNotFound,
        TaskStatus::DetailPageError,
        TaskStatus::UnknownError,
    ];

    /// Can a task move from self to `to`?
    ///
    /// `InProgress -> InProgress` is allowed: a redelivered message for a task
    /// whose harvest never committed re-enters processing.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, InProgress) | (InProgress, InProgress) => true,
            (InProgress, to) => to.is_terminal(),
            _ => false,
        }
    }

    /// Is this a terminal status? Terminal tasks are never revisited.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Is this one of the four failure buckets?
    pub fn is_error(self) -> bool {
        self.is_terminal() && self != TaskStatus::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
            TaskStatus::NetworkError => "NETWORK_ERROR",
            TaskStatus::SkuNotFound => "SKU_NOT_FOUND",
            TaskStatus::DetailPageError => "DETAIL_PAGE_ERROR",
            TaskStatus::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Other(format!("unknown task status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Input to the producer. Everything but the id has a sensible default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub(crate) task_id: TaskId,
    pub(crate) resource_sku: String,
    pub(crate) vendor_url: String,
    pub(crate) priority: i16,
    pub(crate) created_at: DateTime<Utc>,
}

impl NewTask {
    pub fn new(
        task_id: impl Into<TaskId>,
        resource_sku: impl Into<String>,
        vendor_url: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            resource_sku: resource_sku.into(),
            vendor_url: vendor_url.into(),
            priority: 0,
            created_at: Utc::now(),
        }
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Reject inputs that must never reach the store.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("task_id", self.task_id.as_str()),
            ("resource_sku", self.resource_sku.as_str()),
            ("vendor_url", self.vendor_url.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }

    /// The PENDING record this input becomes.
    pub fn into_task(self) -> Task {
        Task {
            task_id: self.task_id,
            resource_sku: self.resource_sku,
            vendor_url: self.vendor_url,
            priority: self.priority,
            status: TaskStatus::Pending,
            created_at: self.created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel payload
// ---------------------------------------------------------------------------

/// What travels on the delivery channel: a reference, never the task state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task_id: TaskId,
}

impl TaskRef {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a delivered payload. Missing or blank `task_id` is malformed.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        let task_ref: TaskRef = serde_json::from_value(payload.clone())?;
        if task_ref.task_id.as_str().trim().is_empty() {
            return Err(Error::Validation("task_id must not be empty".to_string()));
        }
        Ok(task_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progression_follows_lifecycle() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(InProgress));
        for terminal in [Done, NetworkError, SkuNotFound, DetailPageError, UnknownError] {
            assert!(InProgress.can_transition_to(terminal));
            assert!(!Pending.can_transition_to(terminal));
        }
    }

    #[test]
    fn terminal_statuses_never_move() {
        for from in TaskStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TaskStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in TaskStatus::ALL {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("done".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert!("COMPLETED".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(TaskStatus::SkuNotFound).unwrap(),
            json!("SKU_NOT_FOUND")
        );
    }

    #[test]
    fn validate_rejects_blank_fields() {
        assert!(NewTask::new("t1", "SKU", "https://v.example.com").validate().is_ok());
        assert!(NewTask::new("", "SKU", "https://v").validate().is_err());
        assert!(NewTask::new("t1", "  ", "https://v").validate().is_err());
        assert!(NewTask::new("t1", "SKU", "").validate().is_err());
    }

    #[test]
    fn task_ref_requires_task_id() {
        let ok = TaskRef::from_payload(&json!({"task_id": "T1", "extra": 1})).unwrap();
        assert_eq!(ok.task_id, TaskId::from("T1"));

        assert!(TaskRef::from_payload(&json!({"resource_sku": "X"})).is_err());
        assert!(TaskRef::from_payload(&json!({"task_id": ""})).is_err());
        assert!(TaskRef::from_payload(&json!({"task_id": 42})).is_err());
        assert!(TaskRef::from_payload(&json!("not an object")).is_err());
    }
}

//! Append-only audit trail scoped to a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskId;

/// A persisted lifecycle event. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_id: Uuid,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub component: Component,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(crate::error::Error::Other(format!(
                "unknown log level: {other}"
            ))),
        }
    }
}

/// Which side of the pipeline wrote the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Component {
    Producer,
    Agent,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Producer => "PRODUCER",
            Component::Agent => "AGENT",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Component {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "PRODUCER" => Ok(Component::Producer),
            "AGENT" => Ok(Component::Agent),
            other => Err(crate::error::Error::Other(format!(
                "unknown component: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// A log entry before the store assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub(crate) task_id: TaskId,
    pub(crate) level: LogLevel,
    pub(crate) message: String,
    pub(crate) component: Component,
    pub(crate) details: Option<serde_json::Value>,
}

impl NewLogEntry {
    pub fn new(
        task_id: TaskId,
        level: LogLevel,
        component: Component,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            level,
            message: message.into(),
            component,
            details: None,
        }
    }

    pub fn info(task_id: TaskId, component: Component, message: impl Into<String>) -> Self {
        Self::new(task_id, LogLevel::Info, component, message)
    }

    pub fn error(task_id: TaskId, component: Component, message: impl Into<String>) -> Self {
        Self::new(task_id, LogLevel::Error, component, message)
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Stamp the entry for persistence.
    pub fn into_entry(self, timestamp: DateTime<Utc>) -> LogEntry {
        LogEntry {
            log_id: Uuid::new_v4(),
            task_id: self.task_id,
            timestamp,
            level: self.level,
            message: self.message,
            component: self.component,
            details: self.details,
        }
    }
}

//! Core data model.
//!
//! A task is a unit of harvesting work with a producer-assigned identity and a
//! monotonic lifecycle. Log entries are its append-only audit trail.

pub mod log;
pub mod task;

pub use log::{Component, LogEntry, LogLevel, NewLogEntry};
pub use task::{NewTask, Task, TaskId, TaskRef, TaskStatus};

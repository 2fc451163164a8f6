//! Task lifecycle span helpers.

use opentelemetry::KeyValue;
use tracing::Span;

use crate::model::{Component, TaskId, TaskStatus};

/// Start a span covering one component's handling of a task.
///
/// The `task.status` field is declared empty and is filled in as the task
/// moves through its lifecycle.
pub fn start_task_span(component: Component, task_id: &TaskId) -> Span {
    tracing::info_span!(
        "task.handle",
        "task.component" = %component,
        "task.id" = %task_id,
        "task.status" = tracing::field::Empty,
    )
}

/// Record the status a task just entered.
pub fn record_status(span: &Span, status: TaskStatus) {
    span.record("task.status", status.as_str());
}

/// Record a known `from -> to` transition on the span and the transition
/// counter.
pub fn record_status_transition(span: &Span, from: TaskStatus, to: TaskStatus) {
    record_status(span, to);
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "status_transition");
    });
    super::metrics::task_status_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}

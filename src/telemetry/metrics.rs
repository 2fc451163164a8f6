//! Metric instrument factories for harvestq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"harvestq"` meter; without a
//! registered provider they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("harvestq")
}

/// Counter: producer submissions.
/// Labels: `result` ("created" | "duplicate" | "publish_failed").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("harvestq.tasks.submitted")
        .with_description("Number of tasks submitted by the producer")
        .build()
}

/// Counter: task status transitions.
/// Labels: `from`, `to`.
pub fn task_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("harvestq.tasks.status_transitions")
        .with_description("Number of task status transitions")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive, set_vt).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("harvestq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: how the agent settled each delivery.
/// Labels: `decision` ("ack" | "reject" | "requeue").
pub fn deliveries() -> Counter<u64> {
    meter()
        .u64_counter("harvestq.deliveries")
        .with_description("Number of deliveries settled by the agent")
        .build()
}

/// Histogram: harvest duration in milliseconds.
/// Labels: `status`.
pub fn harvest_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("harvestq.harvest.duration_ms")
        .with_description("Harvest duration in milliseconds")
        .with_unit("ms")
        .build()
}

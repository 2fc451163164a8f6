//! # harvestq
//!
//! Durable task lifecycle over an at-least-once delivery channel.
//!
//! Producers persist tasks in Postgres and publish references to them on a
//! pgmq queue. Agents consume references, harvest, and record a terminal
//! status before acknowledging, so redelivered messages are harmless.

pub mod agent;
pub mod channel;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod producer;
pub mod store;
pub mod telemetry;

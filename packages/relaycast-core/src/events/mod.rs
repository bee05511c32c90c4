//! Event system for observing pipeline activity.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for each domain (ingest, job engine, queue)
//!
//! Nothing outside logging consumes these yet; the wiring exists so a future
//! push/notification transport (SSE, WebSocket) can be added without
//! touching the services that emit events. See [`BroadcastEventBridge`].

mod emitter;
mod bridge;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events observable across the system.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Ingest session lifecycle events.
    Ingest(IngestEvent),
    /// Job engine state-machine transitions.
    Job(JobEvent),
    /// Persistent queue mutations.
    Queue(QueueEvent),
}

/// Events from the ingest pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IngestEvent {
    /// A new ingest session started for an identifier.
    Started { identifier: String, timestamp: u64 },
    /// An ingest session ended (natural EOF, stop, or error).
    Ended {
        identifier: String,
        reason: IngestEndReason,
        timestamp: u64,
    },
}

/// Why an ingest session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestEndReason {
    Eof,
    Stopped,
    Failed,
}

/// Events from the background job engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    /// A job's state machine transitioned.
    StateChanged {
        identifier: String,
        state: String,
        timestamp: u64,
    },
}

/// Events from the persistent queue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    /// An item was appended to the queue.
    Appended { entry_id: i64, timestamp: u64 },
    /// The queue advanced (auto-advance or explicit `next`).
    Advanced {
        entry_id: Option<i64>,
        timestamp: u64,
    },
}

impl From<IngestEvent> for BroadcastEvent {
    fn from(event: IngestEvent) -> Self {
        BroadcastEvent::Ingest(event)
    }
}

impl From<JobEvent> for BroadcastEvent {
    fn from(event: JobEvent) -> Self {
        BroadcastEvent::Job(event)
    }
}

impl From<QueueEvent> for BroadcastEvent {
    fn from(event: QueueEvent) -> Self {
        BroadcastEvent::Queue(event)
    }
}

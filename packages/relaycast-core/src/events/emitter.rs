//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{IngestEvent, JobEvent, QueueEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to clients.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn do_something(&self) {
///         self.emitter.emit_job(JobEvent::StateChanged { .. });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits an ingest lifecycle event.
    fn emit_ingest(&self, event: IngestEvent);

    /// Emits a job state-machine transition.
    fn emit_job(&self, event: JobEvent);

    /// Emits a queue mutation event.
    fn emit_queue(&self, event: QueueEvent);
}

/// No-op emitter for tests or configurations with no push transport attached.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_ingest(&self, _event: IngestEvent) {}
    fn emit_job(&self, _event: JobEvent) {}
    fn emit_queue(&self, _event: QueueEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_ingest(&self, event: IngestEvent) {
        tracing::debug!(?event, "ingest_event");
    }

    fn emit_job(&self, event: JobEvent) {
        tracing::debug!(?event, "job_event");
    }

    fn emit_queue(&self, event: QueueEvent) {
        tracing::debug!(?event, "queue_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        ingest_count: AtomicUsize,
        job_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                ingest_count: AtomicUsize::new(0),
                job_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_ingest(&self, _event: IngestEvent) {
            self.ingest_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_job(&self, _event: JobEvent) {
            self.job_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_queue(&self, _event: QueueEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_ingest(IngestEvent::Started {
            identifier: "abcDEF12345".into(),
            timestamp: 0,
        });
        emitter.emit_ingest(IngestEvent::Ended {
            identifier: "abcDEF12345".into(),
            reason: super::super::IngestEndReason::Eof,
            timestamp: 0,
        });
        emitter.emit_job(JobEvent::StateChanged {
            identifier: "abcDEF12345".into(),
            state: "completed".into(),
            timestamp: 0,
        });

        assert_eq!(emitter.ingest_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.job_count.load(Ordering::SeqCst), 1);
    }
}

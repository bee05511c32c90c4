//! Coordinator: ties the persistent store, ingest supervisor, broadcaster,
//! job engine, and capture retention together behind the external command
//! surface (`start_stream`, `stop_stream`, `status`, `capture_ready`,
//! `enqueue_item`, `list_queue`, `remove_entry`, `reorder_queue`, `next`,
//! `clear_queue`, `list_history`, `clear_history`, `job_status`).
//!
//! Mirrors this codebase's controller pattern: a single `Arc`-wrapped struct
//! holding every collaborator, with one currently-active session tracked
//! under a `parking_lot::Mutex` so the broadcaster handle and session
//! metadata are read without ever holding the lock across an `.await`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::broadcaster::{Broadcaster, Subscription};
use crate::error::{RelayError, RelayResult};
use crate::events::{EventEmitter, QueueEvent};
use crate::ingest::{is_capture_ready, IngestOutcome, IngestSupervisor};
use crate::jobs::{EnqueueOptions, Job, JobEngine};
use crate::retention;
use crate::store::{HistoryEntry, PersistentStore, QueueEntry};
use crate::utils::{now_millis, validate_identifier};

/// Result of a successful `start_stream`/`next` call.
#[derive(Debug, Clone, Serialize)]
pub struct StartStreamResult {
    pub title: String,
}

/// Result of an `enqueue_item` call.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueItemResult {
    pub added: bool,
    pub title: String,
}

/// Result of a `next` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NextResult {
    Started { identifier: String, title: String },
    QueueEmpty,
}

/// Result of a `status` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Idle,
    Streaming { identifier: String, title: String },
}

struct CurrentSession {
    identifier: String,
    title: String,
    broadcaster: Broadcaster,
    skip_post_processing: bool,
}

struct CoordinatorInner {
    store: Arc<PersistentStore>,
    ingest: Arc<IngestSupervisor>,
    jobs: Arc<JobEngine>,
    events: Arc<dyn EventEmitter>,
    current: Mutex<Option<CurrentSession>>,
    replay_capacity: usize,
    subscription_capacity: usize,
    pre_fetch_threshold: Duration,
    capture_dir: PathBuf,
    capture_extension: String,
    capture_retention_count: usize,
}

/// Owns the active session and wires every collaborator behind the command
/// surface. Cheap to clone (an `Arc` handle), mirroring [`Broadcaster`].
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PersistentStore>,
        ingest: Arc<IngestSupervisor>,
        jobs: Arc<JobEngine>,
        events: Arc<dyn EventEmitter>,
        replay_capacity: usize,
        subscription_capacity: usize,
        pre_fetch_threshold: Duration,
        capture_dir: PathBuf,
        capture_extension: String,
        capture_retention_count: usize,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                ingest,
                jobs,
                events,
                current: Mutex::new(None),
                replay_capacity,
                subscription_capacity,
                pre_fetch_threshold,
                capture_dir,
                capture_extension,
                capture_retention_count,
            }),
        }
    }

    /// Starts ingest for `identifier`, tearing down any previously active
    /// session first (delegated to [`IngestSupervisor::start`]).
    pub async fn start_stream(
        &self,
        identifier: &str,
        skip_post_processing: bool,
    ) -> RelayResult<StartStreamResult> {
        validate_identifier(identifier)?;
        self.begin_session(identifier, skip_post_processing).await
    }

    /// Cancels the active session, if any. Idempotent.
    pub async fn stop_stream(&self) {
        let session = self.inner.current.lock().take();
        if let Some(session) = session {
            session.broadcaster.close();
        }
        self.inner.ingest.stop().await;
    }

    /// Current stream status.
    pub fn status(&self) -> StreamStatus {
        match self.inner.current.lock().as_ref() {
            Some(session) => StreamStatus::Streaming {
                identifier: session.identifier.clone(),
                title: session.title.clone(),
            },
            None => StreamStatus::Idle,
        }
    }

    /// Whether `identifier`'s capture file exists and is nonzero-sized.
    pub fn capture_ready(&self, identifier: &str) -> bool {
        is_capture_ready(&self.inner.capture_dir, identifier, &self.inner.capture_extension)
    }

    /// Subscribes to the currently active stream's byte broadcast.
    pub fn subscribe_stream(&self) -> RelayResult<Subscription> {
        match self.inner.current.lock().as_ref() {
            Some(session) => Ok(session.broadcaster.subscribe()),
            None => Err(RelayError::StreamNotFound("no active stream".to_string())),
        }
    }

    /// Adds `identifier` to the persistent queue, unless a non-terminal job
    /// already exists for it (the post-capture pipeline already owns this
    /// identifier's in-flight work).
    pub async fn enqueue_item(
        &self,
        identifier: &str,
        skip_post_processing: bool,
    ) -> RelayResult<EnqueueItemResult> {
        validate_identifier(identifier)?;
        let metadata = self.inner.ingest.resolve_metadata(identifier).await?;

        if self.inner.jobs.should_skip(identifier) {
            return Ok(EnqueueItemResult {
                added: false,
                title: metadata.title,
            });
        }

        let entry = self
            .inner
            .store
            .append(identifier, &metadata.title, skip_post_processing)
            .await?;
        self.inner.events.emit_queue(QueueEvent::Appended {
            entry_id: entry.entry_id,
            timestamp: now_millis(),
        });

        Ok(EnqueueItemResult {
            added: true,
            title: metadata.title,
        })
    }

    pub async fn list_queue(&self) -> RelayResult<Vec<QueueEntry>> {
        self.inner.store.list_queue().await
    }

    pub async fn remove_entry(&self, entry_id: i64) -> RelayResult<()> {
        self.inner.store.remove(entry_id).await
    }

    pub async fn reorder_queue(&self, ordered_entry_ids: &[i64]) -> RelayResult<()> {
        self.inner.store.reorder(ordered_entry_ids).await
    }

    /// Pops the front of the queue and starts ingest for it, if any.
    pub async fn next(&self) -> RelayResult<NextResult> {
        match self.inner.store.pop_current().await? {
            Some(entry) => {
                let result = self
                    .begin_session(&entry.identifier, entry.skip_post_processing)
                    .await?;
                self.inner.events.emit_queue(QueueEvent::Advanced {
                    entry_id: Some(entry.entry_id),
                    timestamp: now_millis(),
                });
                Ok(NextResult::Started {
                    identifier: entry.identifier,
                    title: result.title,
                })
            }
            None => Ok(NextResult::QueueEmpty),
        }
    }

    pub async fn clear_queue(&self) -> RelayResult<()> {
        self.inner.store.clear_queue().await
    }

    pub async fn list_history(&self, limit: i64) -> RelayResult<Vec<HistoryEntry>> {
        self.inner.store.recent(limit).await
    }

    pub async fn clear_history(&self) -> RelayResult<()> {
        self.inner.store.clear_history().await
    }

    pub fn job_status(&self, identifier: &str) -> Option<Job> {
        self.inner.jobs.status(identifier)
    }

    /// Common path for `start_stream` and auto-advance/`next`: resolves
    /// metadata, records history eagerly (before the first byte, per the
    /// decided history-on-failure question), installs the new session, and
    /// arms the pre-fetch timer.
    async fn begin_session(
        &self,
        identifier: &str,
        skip_post_processing: bool,
    ) -> RelayResult<StartStreamResult> {
        let broadcaster = Broadcaster::new(self.inner.replay_capacity, self.inner.subscription_capacity);

        let coordinator = self.clone();
        let identifier_owned = identifier.to_string();
        let metadata = self
            .inner
            .ingest
            .start(identifier, broadcaster.clone(), {
                let identifier_owned = identifier_owned.clone();
                move |outcome| {
                    tokio::spawn(async move {
                        coordinator
                            .handle_ingest_finished(identifier_owned, outcome, skip_post_processing)
                            .await;
                    });
                }
            })
            .await?;

        self.inner
            .store
            .record_play(identifier, &metadata.title, &metadata.channel, &metadata.thumbnail)
            .await?;

        *self.inner.current.lock() = Some(CurrentSession {
            identifier: identifier_owned,
            title: metadata.title.clone(),
            broadcaster,
            skip_post_processing,
        });

        self.maybe_spawn_pre_fetch(identifier, metadata.duration_seconds);

        Ok(StartStreamResult { title: metadata.title })
    }

    /// Invoked once, from a detached task, when an ingest session ends. Never
    /// called inline from the ingest supervisor itself — cleanup and
    /// auto-advance both do I/O that must never block the read loop that
    /// just finished.
    async fn handle_ingest_finished(&self, identifier: String, outcome: IngestOutcome, skip_post_processing: bool) {
        {
            let mut current = self.inner.current.lock();
            if current.as_ref().map(|s| s.identifier.as_str()) == Some(identifier.as_str()) {
                *current = None;
            }
        }

        let capture_dir = self.inner.capture_dir.clone();
        let keep = self.inner.capture_retention_count;
        tokio::spawn(async move { retention::sweep(&capture_dir, keep).await });

        if outcome != IngestOutcome::Eof {
            return;
        }

        if !skip_post_processing
            && is_capture_ready(&self.inner.capture_dir, &identifier, &self.inner.capture_extension)
        {
            if let Some(status) = self.inner.store.recent(1).await.ok().and_then(|mut v| v.pop()) {
                self.inner.jobs.enqueue(
                    &identifier,
                    EnqueueOptions {
                        title: status.title,
                        channel: status.channel,
                    },
                );
            }
        }

        self.advance_queue().await;
    }

    async fn advance_queue(&self) {
        match self.inner.store.pop_current().await {
            Ok(Some(entry)) => {
                if let Err(err) = self
                    .begin_session(&entry.identifier, entry.skip_post_processing)
                    .await
                {
                    log::warn!(
                        "auto-advance failed to start queue entry {}: {err}",
                        entry.identifier
                    );
                } else {
                    self.inner.events.emit_queue(QueueEvent::Advanced {
                        entry_id: Some(entry.entry_id),
                        timestamp: now_millis(),
                    });
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("auto-advance failed to pop queue: {err}"),
        }
    }

    /// Arms a one-shot timer that warms the next queue entry's capture file
    /// once `duration_seconds - pre_fetch_threshold` has elapsed. A no-op if
    /// the source's duration is unknown.
    fn maybe_spawn_pre_fetch(&self, identifier: &str, duration_seconds: Option<f64>) {
        let Some(duration) = duration_seconds else {
            return;
        };
        let wait_secs = (duration - self.inner.pre_fetch_threshold.as_secs_f64()).max(0.0);
        let coordinator = self.clone();
        let identifier = identifier.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
            coordinator.pre_fetch_next(&identifier).await;
        });
    }

    async fn pre_fetch_next(&self, current_identifier: &str) {
        let gate = {
            let current = self.inner.current.lock();
            match current.as_ref() {
                Some(session) if session.identifier == current_identifier => {
                    Some(session.skip_post_processing)
                }
                _ => None,
            }
        };
        let Some(skip_post_processing) = gate else {
            return;
        };
        if skip_post_processing {
            return;
        }

        match self.inner.store.peek_next().await {
            Ok(Some(entry)) => {
                if let Err(err) = self.inner.ingest.warm(&entry.identifier).await {
                    log::warn!("pre-fetch warm failed for {}: {err}", entry.identifier);
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!("pre-fetch peek_next failed: {err}"),
        }
    }
}

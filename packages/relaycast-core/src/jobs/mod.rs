//! Background job engine: one worker, a FIFO channel, and a bounded
//! in-memory job table enforcing "at most one non-terminal job per
//! identifier" without any extra locking — the identifier itself is the
//! concurrency key.

pub mod retry;

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::events::{EventEmitter, JobEvent};
use crate::pipeline::{self, DedupOutcome, PipelineCollaborators, PublishOutcome};
use crate::utils::now_millis;

/// The single job kind this engine runs. Kept as an enum (rather than a
/// bare string) so a second pipeline kind can be added later without
/// widening every call site to a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcription,
}

/// A job's position in the post-capture pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    CheckingDedup,
    Transcribing,
    Summarizing,
    Publishing,
    Completed,
    Skipped,
    Failed,
}

impl JobState {
    /// Terminal states: `completed`, `skipped`, `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// One unit of post-capture work for a single identifier.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub identifier: String,
    pub kind: JobKind,
    pub state: JobState,
    pub title: String,
    pub channel: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub note_id: Option<String>,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

/// Metadata carried alongside an `enqueue` call — the title/channel the
/// summarization prompt is built from, so the worker never needs to go
/// back to the store mid-pipeline.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub title: String,
    pub channel: String,
}

struct JobEngineShared {
    table: DashMap<String, Job>,
    collaborators: PipelineCollaborators,
    events: Arc<dyn EventEmitter>,
    capacity: usize,
}

/// Sequential, single-worker job engine over a bounded job table.
pub struct JobEngine {
    shared: Arc<JobEngineShared>,
    tx: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl JobEngine {
    /// Creates the engine and spawns its single worker task immediately.
    pub fn spawn(
        collaborators: PipelineCollaborators,
        events: Arc<dyn EventEmitter>,
        capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(JobEngineShared {
            table: DashMap::new(),
            collaborators,
            events,
            capacity,
        });
        let shutdown = CancellationToken::new();

        let engine = Arc::new(Self {
            shared: Arc::clone(&shared),
            tx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_worker(shared, rx, shutdown));
        engine
    }

    /// Enqueues a job for `identifier`. Returns `false` without altering
    /// anything if a non-terminal job for that identifier already exists.
    pub fn enqueue(&self, identifier: &str, options: EnqueueOptions) -> bool {
        if self.should_skip(identifier) {
            return false;
        }
        let job = Job {
            identifier: identifier.to_string(),
            kind: JobKind::Transcription,
            state: JobState::Pending,
            title: options.title,
            channel: options.channel,
            attempt_count: 0,
            last_error: None,
            note_id: None,
            created_at: now_millis(),
            started_at: None,
            finished_at: None,
        };
        self.shared.table.insert(identifier.to_string(), job);
        // Channel send only fails if every receiver (the single worker) is
        // gone, i.e. the engine has been shut down.
        let _ = self.tx.send(identifier.to_string());
        true
    }

    /// True iff a non-terminal job exists for `identifier`.
    pub fn should_skip(&self, identifier: &str) -> bool {
        self.shared
            .table
            .get(identifier)
            .map(|job| !job.state.is_terminal())
            .unwrap_or(false)
    }

    /// Snapshot of the job record for `identifier`, if known.
    pub fn status(&self, identifier: &str) -> Option<Job> {
        self.shared.table.get(identifier).map(|j| j.clone())
    }

    /// Cancels the worker loop. Any job still `pending` in the table when
    /// this resolves is marked `failed` with reason `shutdown`; the job
    /// currently being processed finishes its current stage's call before
    /// observing cancellation (cooperative, at the next suspension point).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for mut entry in self.shared.table.iter_mut() {
            if !entry.state.is_terminal() {
                entry.state = JobState::Failed;
                entry.last_error = Some("shutdown".to_string());
                entry.finished_at = Some(now_millis());
            }
        }
    }
}

async fn run_worker(
    shared: Arc<JobEngineShared>,
    mut rx: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        let identifier = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };

        // A job can have been removed (e.g. evicted) between enqueue and
        // now; skip silently rather than recreating it.
        if shared.table.get(&identifier).is_none() {
            continue;
        }

        process_job(&shared, &identifier).await;
        evict_if_over_capacity(&shared);
    }
}

fn set_state(shared: &JobEngineShared, identifier: &str, state: JobState) {
    if let Some(mut job) = shared.table.get_mut(identifier) {
        job.state = state;
        if job.started_at.is_none() && state != JobState::Pending {
            job.started_at = Some(now_millis());
        }
    }
    shared.events.emit_job(JobEvent::StateChanged {
        identifier: identifier.to_string(),
        state: format!("{state:?}").to_lowercase(),
        timestamp: now_millis(),
    });
}

fn finish(shared: &JobEngineShared, identifier: &str, state: JobState, error: Option<String>, note_id: Option<String>, attempts: u32) {
    if let Some(mut job) = shared.table.get_mut(identifier) {
        job.state = state;
        job.last_error = error;
        job.note_id = note_id;
        job.attempt_count = job.attempt_count.max(attempts);
        job.finished_at = Some(now_millis());
    }
    shared.events.emit_job(JobEvent::StateChanged {
        identifier: identifier.to_string(),
        state: format!("{state:?}").to_lowercase(),
        timestamp: now_millis(),
    });

    // Cleanup is scheduled asynchronously and must never block the worker
    // from picking up the next job.
    let collaborators = shared.collaborators.clone();
    let identifier = identifier.to_string();
    tokio::spawn(async move {
        pipeline::cleanup(&identifier, &collaborators).await;
    });
}

async fn process_job(shared: &Arc<JobEngineShared>, identifier: &str) {
    let (title, channel) = match shared.table.get(identifier) {
        Some(job) => (job.title.clone(), job.channel.clone()),
        None => return,
    };

    set_state(shared, identifier, JobState::CheckingDedup);
    match pipeline::check_dedup(identifier, &shared.collaborators).await {
        DedupOutcome::AlreadyExists { note_ref } => {
            finish(shared, identifier, JobState::Skipped, None, Some(note_ref), 0);
            return;
        }
        DedupOutcome::Proceed => {}
    }

    set_state(shared, identifier, JobState::Transcribing);
    let transcribe_attempts = AtomicU32::new(0);
    if let Err(err) = pipeline::transcribe(identifier, &shared.collaborators, &transcribe_attempts).await {
        finish_failed(shared, identifier, err, transcribe_attempts.into_inner());
        return;
    }

    set_state(shared, identifier, JobState::Summarizing);
    let summarize_attempts = AtomicU32::new(0);
    if let Err(err) = pipeline::summarize(identifier, &title, &channel, &shared.collaborators, &summarize_attempts).await
    {
        let attempts = transcribe_attempts.into_inner() + summarize_attempts.into_inner();
        finish_failed(shared, identifier, err, attempts);
        return;
    }

    set_state(shared, identifier, JobState::Publishing);
    let publish_attempts = AtomicU32::new(0);
    match pipeline::publish(identifier, &title, &shared.collaborators, &publish_attempts).await {
        Ok(PublishOutcome::Published { note_id }) => {
            let attempts =
                transcribe_attempts.into_inner() + summarize_attempts.into_inner() + publish_attempts.into_inner();
            finish(shared, identifier, JobState::Completed, None, Some(note_id), attempts);
        }
        Ok(PublishOutcome::BackedUp { backup_path }) => {
            let attempts =
                transcribe_attempts.into_inner() + summarize_attempts.into_inner() + publish_attempts.into_inner();
            finish(
                shared,
                identifier,
                JobState::Completed,
                None,
                Some(backup_path.display().to_string()),
                attempts,
            );
        }
        Err(err) => {
            let attempts =
                transcribe_attempts.into_inner() + summarize_attempts.into_inner() + publish_attempts.into_inner();
            finish_failed(shared, identifier, err, attempts);
        }
    }
}

fn finish_failed(shared: &JobEngineShared, identifier: &str, err: RelayError, attempts: u32) {
    finish(shared, identifier, JobState::Failed, Some(err.to_string()), None, attempts);
}

fn evict_if_over_capacity(shared: &JobEngineShared) {
    if shared.table.len() <= shared.capacity {
        return;
    }
    let mut terminal: Vec<(String, u64)> = shared
        .table
        .iter()
        .filter(|e| e.state.is_terminal())
        .map(|e| (e.identifier.clone(), e.finished_at.unwrap_or(0)))
        .collect();
    terminal.sort_by_key(|(_, finished_at)| *finished_at);
    let overflow = shared.table.len().saturating_sub(shared.capacity);
    for (identifier, _) in terminal.into_iter().take(overflow) {
        shared.table.remove(&identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::pipeline::{
        BackupSink, FilesystemBackupSink, NoteStore, SummarizationProvider, SummarizationResult,
        TranscriptionProvider, TranscriptionResult,
    };
    use crate::store::PersistentStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubTranscription;
    #[async_trait]
    impl TranscriptionProvider for StubTranscription {
        fn provider_name(&self) -> &str {
            "stub"
        }
        fn model_name(&self) -> &str {
            "stub-1"
        }
        async fn transcribe(&self, _audio_path: &Path) -> crate::error::RelayResult<TranscriptionResult> {
            Ok(TranscriptionResult {
                text: "hello world".to_string(),
                audio_duration_seconds: Some(12.0),
                prompt_tokens: None,
                response_tokens: None,
            })
        }
    }

    struct FlakyTranscription {
        failures_remaining: AtomicUsize,
    }
    #[async_trait]
    impl TranscriptionProvider for FlakyTranscription {
        fn provider_name(&self) -> &str {
            "flaky"
        }
        fn model_name(&self) -> &str {
            "flaky-1"
        }
        async fn transcribe(&self, _audio_path: &Path) -> crate::error::RelayResult<TranscriptionResult> {
            if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            }).is_ok() {
                return Err(RelayError::ExternalUnavailable("503".into()));
            }
            Ok(TranscriptionResult {
                text: "hello world".to_string(),
                audio_duration_seconds: Some(1.0),
                prompt_tokens: None,
                response_tokens: None,
            })
        }
    }

    struct StubSummarization;
    #[async_trait]
    impl SummarizationProvider for StubSummarization {
        fn provider_name(&self) -> &str {
            "stub"
        }
        fn model_name(&self) -> &str {
            "stub-1"
        }
        async fn summarize(&self, _prompt: &str) -> crate::error::RelayResult<SummarizationResult> {
            Ok(SummarizationResult {
                text: "a summary".to_string(),
                prompt_tokens: Some(10),
                response_tokens: Some(5),
            })
        }
    }

    struct StubNoteStore {
        existing: Option<String>,
    }
    #[async_trait]
    impl NoteStore for StubNoteStore {
        async fn find_by_label(&self, _name: &str, _value: &str) -> crate::error::RelayResult<Option<String>> {
            Ok(self.existing.clone())
        }
        async fn create_note(&self, _title: &str, _body: &str, _mime: &str) -> crate::error::RelayResult<String> {
            Ok("note-1".to_string())
        }
        async fn add_label(&self, _note_id: &str, _name: &str, _value: &str) -> crate::error::RelayResult<()> {
            Ok(())
        }
    }

    async fn collaborators(
        transcription: Arc<dyn TranscriptionProvider>,
        note_store_existing: Option<String>,
    ) -> (PipelineCollaborators, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("capture")).unwrap();
        std::fs::write(dir.path().join("capture/abcDEF12345.ext"), b"audio-bytes").unwrap();
        let collaborators = PipelineCollaborators {
            transcription,
            summarization: Arc::new(StubSummarization),
            note_store: Arc::new(StubNoteStore { existing: note_store_existing }),
            backup_sink: Arc::new(FilesystemBackupSink),
            store: Arc::new(PersistentStore::open_in_memory().await.unwrap()),
            capture_dir: dir.path().join("capture"),
            transcript_cache_dir: dir.path().join("transcripts"),
            summary_cache_dir: dir.path().join("summaries"),
            backup_dir: dir.path().join("backup"),
            transcribe_timeout: Duration::from_secs(5),
            summarize_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
        };
        (collaborators, dir)
    }

    // 1000 * 10ms covers the worst-case real-time retry backoff
    // (RETRY_DELAYS_SECS sums to well under 10s) and, under a paused clock,
    // costs no wall time at all since each sleep just advances the virtual
    // clock to the worker's next timer.
    async fn wait_for_terminal(engine: &JobEngine, identifier: &str) -> Job {
        for _ in 0..1000 {
            if let Some(job) = engine.status(identifier) {
                if job.state.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn enqueue_twice_while_non_terminal_is_rejected() {
        let (collaborators, _dir) = collaborators(Arc::new(StubTranscription), None).await;
        let engine = JobEngine::spawn(collaborators, Arc::new(NoopEventEmitter), 10);

        let options = || EnqueueOptions {
            title: "Title".to_string(),
            channel: "Channel".to_string(),
        };
        assert!(engine.enqueue("abcDEF12345", options()));
        assert!(!engine.enqueue("abcDEF12345", options()));

        let _ = wait_for_terminal(&engine, "abcDEF12345").await;
    }

    #[tokio::test]
    async fn dedup_short_circuits_to_skipped_without_transcribing() {
        let (collaborators, _dir) =
            collaborators(Arc::new(StubTranscription), Some("existing-note".to_string())).await;
        let engine = JobEngine::spawn(collaborators, Arc::new(NoopEventEmitter), 10);

        engine.enqueue(
            "abcDEF12345",
            EnqueueOptions {
                title: "Title".to_string(),
                channel: "Channel".to_string(),
            },
        );

        let job = wait_for_terminal(&engine, "abcDEF12345").await;
        assert_eq!(job.state, JobState::Skipped);
        assert_eq!(job.note_id.as_deref(), Some("existing-note"));
    }

    // Uses a paused virtual clock so the two retry backoffs (RETRY_DELAYS_SECS)
    // resolve instantly instead of costing several seconds of real test time.
    // wait_for_terminal's own polling sleep rides the same clock: with the
    // worker parked on a backoff timer and the test parked on a 10ms poll
    // timer, tokio auto-advances to whichever fires next, so the loop still
    // observes every state transition without ever waiting on a real clock.
    #[tokio::test(start_paused = true)]
    async fn retry_then_succeed_completes_with_attempt_count_three() {
        let (collaborators, _dir) = collaborators(
            Arc::new(FlakyTranscription {
                failures_remaining: AtomicUsize::new(2),
            }),
            None,
        )
        .await;
        let engine = JobEngine::spawn(collaborators, Arc::new(NoopEventEmitter), 10);

        engine.enqueue(
            "abcDEF12345",
            EnqueueOptions {
                title: "Title".to_string(),
                channel: "Channel".to_string(),
            },
        );

        let job = wait_for_terminal(&engine, "abcDEF12345").await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempt_count, 3);
    }

    #[tokio::test]
    async fn shutdown_marks_pending_jobs_failed() {
        let (collaborators, _dir) = collaborators(Arc::new(StubTranscription), None).await;
        let engine = JobEngine::spawn(collaborators, Arc::new(NoopEventEmitter), 10);
        // Manually insert a pending job without driving the worker, by
        // shutting down before the worker task gets scheduled.
        engine.shutdown().await;
        let job = Job {
            identifier: "zzzzzzzzzzz".to_string(),
            kind: JobKind::Transcription,
            state: JobState::Pending,
            title: "T".into(),
            channel: "C".into(),
            attempt_count: 0,
            last_error: None,
            note_id: None,
            created_at: now_millis(),
            started_at: None,
            finished_at: None,
        };
        engine.shared.table.insert(job.identifier.clone(), job);
        engine.shutdown().await;
        let status = engine.status("zzzzzzzzzzz").unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.last_error.as_deref(), Some("shutdown"));
    }
}


//! Pluggable post-capture pipeline stages: dedup check, transcribe,
//! summarize, publish, cleanup.
//!
//! Each stage is a free function over a narrow collaborator trait plus a
//! [`PipelineCollaborators`] bundle, keeping every external provider behind
//! a trait object so the job worker never depends on a concrete
//! implementation. Stages return `RelayResult`; the caller
//! (the job worker in [`crate::jobs`]) is responsible for recovering errors
//! into the job's `failed` state — a stage itself never retries or mutates
//! job state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use std::sync::atomic::AtomicU32;

use crate::cache;
use crate::error::{RelayError, RelayResult};
use crate::jobs::retry::{with_retry, with_retry_counted};
use crate::store::{PersistentStore, UsageRecord};
use crate::utils::now_millis;

/// Result of calling the transcription provider.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub audio_duration_seconds: Option<f64>,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
}

/// Result of calling the summarization provider.
#[derive(Debug, Clone)]
pub struct SummarizationResult {
    pub text: String,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
}

/// Reads a capture file and produces a transcript.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
    async fn transcribe(&self, audio_path: &Path) -> RelayResult<TranscriptionResult>;
}

/// Produces a summary from a rendered prompt.
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
    async fn summarize(&self, prompt: &str) -> RelayResult<SummarizationResult>;
}

/// The external knowledge store notes are published to.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn find_by_label(&self, name: &str, value: &str) -> RelayResult<Option<String>>;
    async fn create_note(&self, title: &str, body: &str, mime: &str) -> RelayResult<String>;
    async fn add_label(&self, note_id: &str, name: &str, value: &str) -> RelayResult<()>;
}

/// Fallback sink used when the note store's attribute-attach step fails.
#[async_trait]
pub trait BackupSink: Send + Sync {
    async fn write_json(&self, path: &Path, payload: &serde_json::Value) -> RelayResult<()>;
}

/// [`BackupSink`] that writes to the local filesystem via the atomic-write
/// cache primitive.
pub struct FilesystemBackupSink;

#[async_trait]
impl BackupSink for FilesystemBackupSink {
    async fn write_json(&self, path: &Path, payload: &serde_json::Value) -> RelayResult<()> {
        let path = path.to_path_buf();
        let payload = payload.clone();
        tokio::task::spawn_blocking(move || cache::write_atomic(&path, &payload))
            .await
            .map_err(|e| RelayError::Internal(format!("backup sink task join: {e}")))??;
        Ok(())
    }
}

/// JSON cache record persisted after a successful transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptArtifact {
    pub identifier: String,
    pub text: String,
    pub provider: String,
    pub model: String,
    pub audio_duration_seconds: Option<f64>,
}

/// JSON cache record persisted after a successful summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryArtifact {
    pub identifier: String,
    pub text: String,
    pub provider: String,
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub response_tokens: Option<i64>,
}

/// Outcome of the dedup-check stage.
pub enum DedupOutcome {
    /// A note for this identifier already exists; carries its reference.
    AlreadyExists { note_ref: String },
    /// No existing note was found (or the lookup failed open).
    Proceed,
}

/// Outcome of the publish stage.
pub enum PublishOutcome {
    /// Note created and labeled successfully.
    Published { note_id: String },
    /// Attribute attach failed; payload was written to the backup sink.
    BackedUp { backup_path: PathBuf },
}

/// Directories and collaborator handles shared by every pipeline stage.
#[derive(Clone)]
pub struct PipelineCollaborators {
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub summarization: Arc<dyn SummarizationProvider>,
    pub note_store: Arc<dyn NoteStore>,
    pub backup_sink: Arc<dyn BackupSink>,
    pub store: Arc<PersistentStore>,
    pub capture_dir: PathBuf,
    pub transcript_cache_dir: PathBuf,
    pub summary_cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub transcribe_timeout: Duration,
    pub summarize_timeout: Duration,
    pub publish_timeout: Duration,
}

impl PipelineCollaborators {
    fn capture_path(&self, identifier: &str) -> PathBuf {
        self.capture_dir.join(format!("{identifier}.ext"))
    }

    fn transcript_path(&self, identifier: &str) -> PathBuf {
        self.transcript_cache_dir.join(format!("{identifier}.json"))
    }

    fn summary_path(&self, identifier: &str) -> PathBuf {
        self.summary_cache_dir.join(format!("{identifier}.json"))
    }

    fn backup_path(&self, identifier: &str) -> PathBuf {
        self.backup_dir.join(format!("{identifier}.json"))
    }
}

/// Stage 1: queries the note store for an existing note tagged with
/// `identifier`. A transport error on the query itself is logged and
/// treated as "not found" — fail-open, per the design's dedup policy.
pub async fn check_dedup(
    identifier: &str,
    collaborators: &PipelineCollaborators,
) -> DedupOutcome {
    match collaborators
        .note_store
        .find_by_label("source_id", identifier)
        .await
    {
        Ok(Some(note_ref)) => DedupOutcome::AlreadyExists { note_ref },
        Ok(None) => DedupOutcome::Proceed,
        Err(err) => {
            log::warn!(
                "dedup check transport error for {identifier}, proceeding as not-found: {err}"
            );
            DedupOutcome::Proceed
        }
    }
}

/// Stage 2: reads the capture file, calls the transcription provider
/// (retried per [`with_retry`]), persists a [`TranscriptArtifact`], and
/// emits a [`UsageRecord`].
pub async fn transcribe(
    identifier: &str,
    collaborators: &PipelineCollaborators,
    attempts: &AtomicU32,
) -> RelayResult<TranscriptArtifact> {
    let capture_path = collaborators.capture_path(identifier);
    let result = tokio::time::timeout(
        collaborators.transcribe_timeout,
        with_retry_counted(attempts, || collaborators.transcription.transcribe(&capture_path)),
    )
    .await
    .map_err(|_| RelayError::ExternalUnavailable("transcription deadline exceeded".into()))??;

    let artifact = TranscriptArtifact {
        identifier: identifier.to_string(),
        text: result.text.clone(),
        provider: collaborators.transcription.provider_name().to_string(),
        model: collaborators.transcription.model_name().to_string(),
        audio_duration_seconds: result.audio_duration_seconds,
    };

    let path = collaborators.transcript_path(identifier);
    let to_write = artifact.clone();
    tokio::task::spawn_blocking(move || cache::write_atomic(&path, &to_write))
        .await
        .map_err(|e| RelayError::Internal(format!("transcript cache task join: {e}")))??;

    collaborators
        .store
        .record_usage(&UsageRecord {
            provider: artifact.provider.clone(),
            model: artifact.model.clone(),
            feature: "transcribe".to_string(),
            prompt_tokens: result.prompt_tokens,
            response_tokens: result.response_tokens,
            reasoning_tokens: None,
            audio_duration_seconds: result.audio_duration_seconds,
            identifier: Some(identifier.to_string()),
            timestamp: now_millis() as i64,
        })
        .await?;

    Ok(artifact)
}

/// Stage 3: loads the transcript artifact, builds a prompt from (transcript,
/// title, channel), calls the summarization provider, persists a
/// [`SummaryArtifact`], and emits a [`UsageRecord`].
pub async fn summarize(
    identifier: &str,
    title: &str,
    channel: &str,
    collaborators: &PipelineCollaborators,
    attempts: &AtomicU32,
) -> RelayResult<SummaryArtifact> {
    let transcript_path = collaborators.transcript_path(identifier);
    let transcript: TranscriptArtifact = {
        let path = transcript_path.clone();
        tokio::task::spawn_blocking(move || cache::read_json::<TranscriptArtifact>(&path))
            .await
            .map_err(|e| RelayError::Internal(format!("transcript cache task join: {e}")))??
            .ok_or_else(|| {
                RelayError::Internal(format!("missing transcript artifact for {identifier}"))
            })?
    };

    let prompt = format!(
        "Title: {title}\nChannel: {channel}\n\nTranscript:\n{}",
        transcript.text
    );

    let result = tokio::time::timeout(
        collaborators.summarize_timeout,
        with_retry_counted(attempts, || collaborators.summarization.summarize(&prompt)),
    )
    .await
    .map_err(|_| RelayError::ExternalUnavailable("summarization deadline exceeded".into()))??;

    let artifact = SummaryArtifact {
        identifier: identifier.to_string(),
        text: result.text.clone(),
        provider: collaborators.summarization.provider_name().to_string(),
        model: collaborators.summarization.model_name().to_string(),
        prompt_tokens: result.prompt_tokens,
        response_tokens: result.response_tokens,
    };

    let path = collaborators.summary_path(identifier);
    let to_write = artifact.clone();
    tokio::task::spawn_blocking(move || cache::write_atomic(&path, &to_write))
        .await
        .map_err(|e| RelayError::Internal(format!("summary cache task join: {e}")))??;

    collaborators
        .store
        .record_usage(&UsageRecord {
            provider: artifact.provider.clone(),
            model: artifact.model.clone(),
            feature: "summarize".to_string(),
            prompt_tokens: result.prompt_tokens,
            response_tokens: result.response_tokens,
            reasoning_tokens: None,
            audio_duration_seconds: None,
            identifier: Some(identifier.to_string()),
            timestamp: now_millis() as i64,
        })
        .await?;

    Ok(artifact)
}

/// Stage 4: creates a note, then attaches a `source_id` label. If the
/// attach step fails, logs and falls back to the backup sink.
pub async fn publish(
    identifier: &str,
    title: &str,
    collaborators: &PipelineCollaborators,
    attempts: &AtomicU32,
) -> RelayResult<PublishOutcome> {
    let summary_path = collaborators.summary_path(identifier);
    let summary: SummaryArtifact = {
        let path = summary_path.clone();
        tokio::task::spawn_blocking(move || cache::read_json::<SummaryArtifact>(&path))
            .await
            .map_err(|e| RelayError::Internal(format!("summary cache task join: {e}")))??
            .ok_or_else(|| {
                RelayError::Internal(format!("missing summary artifact for {identifier}"))
            })?
    };

    let note_id = tokio::time::timeout(
        collaborators.publish_timeout,
        with_retry_counted(attempts, || {
            collaborators
                .note_store
                .create_note(title, &summary.text, "text/plain")
        }),
    )
    .await
    .map_err(|_| RelayError::ExternalUnavailable("publish deadline exceeded".into()))??;

    let attach_result = tokio::time::timeout(
        collaborators.publish_timeout,
        with_retry(|| {
            collaborators
                .note_store
                .add_label(&note_id, "source_id", identifier)
        }),
    )
    .await;

    let attach_error = match attach_result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(_) => Some("attach deadline exceeded".to_string()),
    };

    match attach_error {
        None => Ok(PublishOutcome::Published { note_id }),
        Some(reason) => {
            log::warn!(
                "attribute attach failed for {identifier} (note {note_id}): {reason}; falling back to backup sink"
            );
            let backup_path = collaborators.backup_path(identifier);
            let payload = serde_json::json!({
                "identifier": identifier,
                "title": title,
                "note_id": note_id,
                "summary": summary.text,
                "attach_error": reason,
            });
            collaborators
                .backup_sink
                .write_json(&backup_path, &payload)
                .await?;
            Ok(PublishOutcome::BackedUp { backup_path })
        }
    }
}

/// Stage 5: best-effort delete of the capture file. Errors are logged, not
/// propagated — cleanup failing must never block the next job.
pub async fn cleanup(identifier: &str, collaborators: &PipelineCollaborators) {
    let path = collaborators.capture_path(identifier);
    if let Err(err) = tokio::fs::remove_file(&path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!("cleanup failed to remove capture file {path:?}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubNoteStore {
        existing: Option<String>,
        fail_attach: bool,
        create_calls: AtomicUsize,
    }

    #[async_trait]
    impl NoteStore for StubNoteStore {
        async fn find_by_label(&self, _name: &str, _value: &str) -> RelayResult<Option<String>> {
            Ok(self.existing.clone())
        }

        async fn create_note(&self, _title: &str, _body: &str, _mime: &str) -> RelayResult<String> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok("note-1".to_string())
        }

        async fn add_label(&self, _note_id: &str, _name: &str, _value: &str) -> RelayResult<()> {
            if self.fail_attach {
                Err(RelayError::ExternalRejected("attach rejected".into()))
            } else {
                Ok(())
            }
        }
    }

    struct FailingNoteStore;

    #[async_trait]
    impl NoteStore for FailingNoteStore {
        async fn find_by_label(&self, _name: &str, _value: &str) -> RelayResult<Option<String>> {
            Err(RelayError::ExternalUnavailable("transport down".into()))
        }
        async fn create_note(&self, _t: &str, _b: &str, _m: &str) -> RelayResult<String> {
            unreachable!()
        }
        async fn add_label(&self, _n: &str, _k: &str, _v: &str) -> RelayResult<()> {
            unreachable!()
        }
    }

    struct RecordingBackupSink {
        written: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl BackupSink for RecordingBackupSink {
        async fn write_json(&self, path: &Path, _payload: &serde_json::Value) -> RelayResult<()> {
            self.written.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dedup_short_circuits_when_note_exists() {
        let note_store = StubNoteStore {
            existing: Some("note-existing".to_string()),
            fail_attach: false,
            create_calls: AtomicUsize::new(0),
        };
        let outcome = check_dedup("abcDEF12345", &collaborators_with(note_store).await).await;
        assert!(matches!(outcome, DedupOutcome::AlreadyExists { note_ref } if note_ref == "note-existing"));
    }

    #[tokio::test]
    async fn dedup_fails_open_on_transport_error() {
        let outcome = check_dedup("abcDEF12345", &collaborators_with(FailingNoteStore).await).await;
        assert!(matches!(outcome, DedupOutcome::Proceed));
    }

    async fn collaborators_with(note_store: impl NoteStore + 'static) -> PipelineCollaborators {
        PipelineCollaborators {
            transcription: Arc::new(NeverCalledTranscription),
            summarization: Arc::new(NeverCalledSummarization),
            note_store: Arc::new(note_store),
            backup_sink: Arc::new(RecordingBackupSink {
                written: Mutex::new(Vec::new()),
            }),
            store: Arc::new(crate::store::PersistentStore::open_in_memory().await.unwrap()),
            capture_dir: PathBuf::from("/tmp/relaycast-test-capture"),
            transcript_cache_dir: PathBuf::from("/tmp/relaycast-test-transcripts"),
            summary_cache_dir: PathBuf::from("/tmp/relaycast-test-summaries"),
            backup_dir: PathBuf::from("/tmp/relaycast-test-backup"),
            transcribe_timeout: Duration::from_secs(1),
            summarize_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(1),
        }
    }

    struct NeverCalledTranscription;
    #[async_trait]
    impl TranscriptionProvider for NeverCalledTranscription {
        fn provider_name(&self) -> &str {
            "none"
        }
        fn model_name(&self) -> &str {
            "none"
        }
        async fn transcribe(&self, _audio_path: &Path) -> RelayResult<TranscriptionResult> {
            unreachable!()
        }
    }

    struct NeverCalledSummarization;
    #[async_trait]
    impl SummarizationProvider for NeverCalledSummarization {
        fn provider_name(&self) -> &str {
            "none"
        }
        fn model_name(&self) -> &str {
            "none"
        }
        async fn summarize(&self, _prompt: &str) -> RelayResult<SummarizationResult> {
            unreachable!()
        }
    }
}

//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place every collaborator
//! is constructed and wired into a running [`Coordinator`]. Call order
//! matters — each step below depends on the previous one:
//!
//! 1. Event bridge (every other service logs through it)
//! 2. Persistent store (queue/history/usage tables)
//! 3. Extractor + transcoder (process-based) behind an [`IngestSupervisor`]
//! 4. Transcription/summarization/note-store providers (HTTP-based) behind
//!    a [`JobEngine`]
//! 5. The [`Coordinator`] tying 2-4 together behind the external command
//!    surface

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::Coordinator;
use crate::error::RelayResult;
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::ingest::{ProcessExtractor, ProcessExtractorConfig, ProcessTranscoder, ProcessTranscoderConfig};
use crate::ingest::IngestSupervisor;
use crate::jobs::JobEngine;
use crate::pipeline::{FilesystemBackupSink, PipelineCollaborators};
use crate::providers::{build_http_client, HttpNoteStore, HttpProviderConfig, HttpSummarizationProvider, HttpTranscriptionProvider};
use crate::store::PersistentStore;
use crate::Config;

/// Filesystem layout and collaborator endpoints that sit outside the
/// bounded-tunable [`Config`] — paths, binaries, and credentials, each of
/// which has no sensible numeric default to validate.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub core: Config,
    pub db_path: String,
    pub capture_dir: PathBuf,
    pub capture_extension: String,
    pub transcript_cache_dir: PathBuf,
    pub summary_cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub extractor: ProcessExtractorConfig,
    pub transcoder: ProcessTranscoderConfig,
    pub transcription_provider: HttpProviderConfig,
    pub summarization_provider: HttpProviderConfig,
    pub note_store_base_url: String,
    pub note_store_api_key: String,
    pub provider_request_timeout: Duration,
}

/// Container for every bootstrapped service, handed to the HTTP layer.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// The external command surface; this is the only handle the API layer
    /// needs to drive the whole system.
    pub coordinator: Coordinator,
    /// The persistent store, exposed separately for read-only admin/CLI use
    /// that doesn't belong on the coordinator's command surface.
    pub store: Arc<PersistentStore>,
    /// Event bridge; callers subscribe to it for a push transport (SSE/WS).
    pub event_bridge: Arc<BroadcastEventBridge>,
}

/// Bootstraps every collaborator and wires them into a [`Coordinator`].
///
/// # Errors
///
/// Returns an error if the SQLite store cannot be opened/migrated, or if
/// the HTTP clients used by the transcription/summarization/note-store
/// providers cannot be constructed.
pub async fn bootstrap(config: BootstrapConfig) -> RelayResult<BootstrappedServices> {
    let event_bridge = Arc::new(BroadcastEventBridge::new(config.core.event_channel_capacity));
    let events: Arc<dyn EventEmitter> = event_bridge.clone();

    let store = Arc::new(PersistentStore::open(&config.db_path).await?);

    let extractor = Arc::new(ProcessExtractor::new(config.extractor));
    let transcoder = Arc::new(ProcessTranscoder::new(config.transcoder));
    let ingest = Arc::new(IngestSupervisor::new(
        extractor,
        transcoder,
        config.capture_dir.clone(),
        config.capture_extension.clone(),
        config.core.ingest.chunk_size_bytes,
        Duration::from_secs(config.core.ingest.kill_grace_secs),
        Arc::clone(&events),
    ));

    let http_client = build_http_client(config.provider_request_timeout)?;
    let transcription = Arc::new(HttpTranscriptionProvider::new(http_client.clone(), config.transcription_provider));
    let summarization = Arc::new(HttpSummarizationProvider::new(http_client.clone(), config.summarization_provider));
    let note_store = Arc::new(HttpNoteStore::new(
        http_client,
        config.note_store_base_url,
        config.note_store_api_key,
    ));

    let collaborators = PipelineCollaborators {
        transcription,
        summarization,
        note_store,
        backup_sink: Arc::new(FilesystemBackupSink),
        store: Arc::clone(&store),
        capture_dir: config.capture_dir.clone(),
        transcript_cache_dir: config.transcript_cache_dir,
        summary_cache_dir: config.summary_cache_dir,
        backup_dir: config.backup_dir,
        transcribe_timeout: Duration::from_secs(config.core.jobs.transcribe_timeout_secs),
        summarize_timeout: Duration::from_secs(config.core.jobs.summarize_timeout_secs),
        publish_timeout: Duration::from_secs(config.core.jobs.publish_timeout_secs),
    };
    let jobs = JobEngine::spawn(collaborators, Arc::clone(&events), config.core.jobs.job_table_capacity);

    let coordinator = Coordinator::new(
        Arc::clone(&store),
        ingest,
        jobs,
        events,
        config.core.broadcaster.replay_buffer_chunks,
        config.core.broadcaster.subscription_queue_chunks,
        Duration::from_secs(config.core.queue.pre_fetch_threshold_secs),
        config.capture_dir,
        config.capture_extension,
        config.core.queue.capture_retention_count,
    );

    Ok(BootstrappedServices { coordinator, store, event_bridge })
}

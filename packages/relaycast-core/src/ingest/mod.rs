//! Ingest pipeline: turns a [`SourceItem`](crate::store) identifier into a
//! flowing byte stream plus a capture file.
//!
//! A single [`IngestSupervisor`] owns the one currently-active ingest
//! session, mirroring the single-active-producer collaborator pattern used
//! throughout this codebase: at most one child-process tree is ever running
//! at a time, guarded by `active.lock()`, and starting a new session always
//! tears down the previous one first.
//!
//! The extractor and transcoder are not spawned directly here — they are
//! reached through the [`Extractor`] and [`Transcoder`] collaborator traits,
//! the same way every external device/SDK in this codebase is wrapped behind
//! a narrow interface: the real binaries are swapped for test doubles in
//! `#[cfg(test)]` without touching this module.

pub mod process;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::Broadcaster;
use crate::error::{RelayError, RelayResult};
use crate::events::{EventEmitter, IngestEndReason, IngestEvent};
use crate::utils::now_millis;

pub use process::{ProcessExtractor, ProcessExtractorConfig, ProcessTranscoder, ProcessTranscoderConfig};

/// Metadata resolved for a `SourceItem` before ingest begins.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub title: String,
    pub channel: String,
    pub thumbnail: String,
    pub duration_seconds: Option<f64>,
}

/// Resolves source metadata and opens the raw audio stream for an
/// identifier. The out-of-scope external extractor binary.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_metadata(&self, identifier: &str) -> RelayResult<SourceMetadata>;

    /// Spawns the extractor process with stdout piped; the caller reads
    /// `child.stdout` and feeds it to the transcoder's stdin.
    async fn spawn_stream(&self, identifier: &str) -> RelayResult<Child>;
}

/// Spawns the transcoder, wiring its stdin to the extractor's stdout and
/// its tee output to `capture_path`. The transcoder process itself performs
/// the tee (per design: "do not block on capture-file writes"); the caller
/// only reads the transcoder's stdout.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn spawn(&self, stdin: Stdio, capture_path: &Path) -> RelayResult<Child>;
}

/// File-existence-and-nonzero-size probe — no content validation.
pub fn is_capture_ready(capture_dir: &Path, identifier: &str, extension: &str) -> bool {
    let path = capture_dir.join(format!("{identifier}.{extension}"));
    std::fs::metadata(&path)
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}

/// Outcome of a completed or aborted ingest session, passed to the
/// auto-advance callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Transcoder reached natural EOF; a pipeline job may be enqueued.
    Eof,
    /// Caller-initiated stop, or superseded by a new `start`.
    Stopped,
    /// Extractor or transcoder failed.
    Failed,
}

struct ActiveSession {
    identifier: String,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Owns the single active ingest session: process lifecycle, cancellation,
/// and the tee from transcoder stdout to the broadcaster.
pub struct IngestSupervisor {
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    capture_dir: PathBuf,
    capture_extension: String,
    chunk_size_bytes: usize,
    kill_grace: Duration,
    active: Mutex<Option<ActiveSession>>,
    events: Arc<dyn EventEmitter>,
}

impl IngestSupervisor {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        capture_dir: PathBuf,
        capture_extension: String,
        chunk_size_bytes: usize,
        kill_grace: Duration,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            extractor,
            transcoder,
            capture_dir,
            capture_extension,
            chunk_size_bytes,
            kill_grace,
            active: Mutex::new(None),
            events,
        }
    }

    fn capture_path(&self, identifier: &str) -> PathBuf {
        self.capture_dir
            .join(format!("{identifier}.{}", self.capture_extension))
    }

    /// Whether an ingest session is currently active.
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Returns the identifier of the active session, if any.
    pub async fn active_identifier(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.identifier.clone())
    }

    /// Cancels and tears down the active session (if any). Idempotent.
    /// Returns once the previous session's process tree is fully gone.
    pub async fn stop(&self) {
        let session = self.active.lock().await.take();
        if let Some(session) = session {
            session.cancel.cancel();
            let _ = session.handle.await;
        }
    }

    /// Resolves metadata, spawns extractor and transcoder, and drives the
    /// tee loop until natural EOF, cancellation, or a fatal I/O error.
    ///
    /// `on_finish` is invoked exactly once with the outcome, after the
    /// broadcaster has been closed and the process tree torn down. The
    /// caller (the queue controller) uses it to trigger auto-advance.
    pub async fn start<F>(
        &self,
        identifier: &str,
        broadcaster: Broadcaster,
        on_finish: F,
    ) -> RelayResult<SourceMetadata>
    where
        F: FnOnce(IngestOutcome) + Send + 'static,
    {
        self.stop().await;

        let metadata = self.extractor.extract_metadata(identifier).await?;

        let cancel = CancellationToken::new();

        self.events.emit_ingest(IngestEvent::Started {
            identifier: identifier.to_string(),
            timestamp: now_millis(),
        });

        let capture_path = self.capture_path(identifier);
        let identifier_owned = identifier.to_string();
        let extractor = Arc::clone(&self.extractor);
        let transcoder = Arc::clone(&self.transcoder);
        let chunk_size = self.chunk_size_bytes;
        let kill_grace = self.kill_grace;
        let events = Arc::clone(&self.events);
        let cancel_for_session = cancel.clone();

        let handle = tokio::spawn(async move {
            let outcome = run_session(
                &identifier_owned,
                &capture_path,
                extractor,
                transcoder,
                broadcaster,
                chunk_size,
                kill_grace,
                cancel_for_session,
            )
            .await;

            events.emit_ingest(IngestEvent::Ended {
                identifier: identifier_owned.clone(),
                reason: match outcome {
                    IngestOutcome::Eof => IngestEndReason::Eof,
                    IngestOutcome::Stopped => IngestEndReason::Stopped,
                    IngestOutcome::Failed => IngestEndReason::Failed,
                },
                timestamp: now_millis(),
            });

            on_finish(outcome);
        });

        *self.active.lock().await = Some(ActiveSession {
            identifier: identifier.to_string(),
            cancel,
            handle,
        });

        Ok(metadata)
    }

    /// Resolves metadata for `identifier` without starting ingest — used by
    /// the queue's `enqueue_item` command to surface a title without
    /// spawning any process.
    pub async fn resolve_metadata(&self, identifier: &str) -> RelayResult<SourceMetadata> {
        self.extractor.extract_metadata(identifier).await
    }

    /// Produces only a capture file for `identifier`, without publishing to
    /// any broadcaster. A no-op if the capture file already exists.
    pub async fn warm(&self, identifier: &str) -> RelayResult<()> {
        let capture_path = self.capture_path(identifier);
        if capture_path.exists() {
            return Ok(());
        }

        let mut extractor_child = self.extractor.spawn_stream(identifier).await?;
        let extractor_stdout = extractor_child
            .stdout
            .take()
            .ok_or_else(|| RelayError::ExtractorUnavailable("no stdout pipe".into()))?;
        let stdin = extractor_stdout
            .try_into_std()
            .map(Stdio::from)
            .unwrap_or_else(|_| Stdio::piped());

        let mut transcoder_child = self.transcoder.spawn(stdin, &capture_path).await?;

        let status = transcoder_child
            .wait()
            .await
            .map_err(|e| RelayError::ExtractorUnavailable(e.to_string()))?;
        let _ = extractor_child.wait().await;

        if !status.success() {
            let _ = tokio::fs::remove_file(&capture_path).await;
            return Err(RelayError::ExtractorUnavailable(format!(
                "warm transcode exited with {status}"
            )));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    identifier: &str,
    capture_path: &Path,
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    broadcaster: Broadcaster,
    chunk_size: usize,
    kill_grace: Duration,
    cancel: CancellationToken,
) -> IngestOutcome {
    let spawn_result: RelayResult<(Child, Child)> = async {
        let mut extractor_child = extractor.spawn_stream(identifier).await?;
        let extractor_stdout = extractor_child
            .stdout
            .take()
            .ok_or_else(|| RelayError::ExtractorUnavailable("no stdout pipe".into()))?;
        let stdin = extractor_stdout
            .try_into_std()
            .map(Stdio::from)
            .unwrap_or_else(|_| Stdio::piped());
        let transcoder_child = transcoder.spawn(stdin, capture_path).await?;
        Ok((extractor_child, transcoder_child))
    }
    .await;

    let (mut extractor_child, mut transcoder_child) = match spawn_result {
        Ok(pair) => pair,
        Err(err) => {
            log::warn!("ingest spawn failed for {identifier}: {err}");
            broadcaster.close();
            remove_if_empty(capture_path).await;
            return IngestOutcome::Failed;
        }
    };

    let Some(mut transcoder_stdout) = transcoder_child.stdout.take() else {
        broadcaster.close();
        terminate(&mut transcoder_child, kill_grace).await;
        terminate(&mut extractor_child, kill_grace).await;
        return IngestOutcome::Failed;
    };

    let mut buf = vec![0u8; chunk_size];
    let mut published_any = false;
    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break IngestOutcome::Stopped;
            }
            read_result = transcoder_stdout.read(&mut buf) => {
                match read_result {
                    Ok(0) => break IngestOutcome::Eof,
                    Ok(n) => {
                        published_any = true;
                        broadcaster.publish(bytes::Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(err) => {
                        log::warn!("ingest read error for {identifier}: {err}");
                        break if published_any { IngestOutcome::Eof } else { IngestOutcome::Failed };
                    }
                }
            }
        }
    };

    broadcaster.close();
    terminate(&mut transcoder_child, kill_grace).await;
    terminate(&mut extractor_child, kill_grace).await;

    if matches!(outcome, IngestOutcome::Stopped | IngestOutcome::Failed) {
        remove_if_empty(capture_path).await;
    }

    outcome
}

async fn remove_if_empty(path: &Path) {
    if let Ok(meta) = tokio::fs::metadata(path).await {
        if meta.len() == 0 {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL if still alive.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Test-double-friendly no-op extractor/transcoder, used by callers that
/// only need a [`Broadcaster`] wired up without a real process tree (e.g.
/// unit tests of the queue controller).
pub struct NullExtractor;

#[async_trait]
impl Extractor for NullExtractor {
    async fn extract_metadata(&self, identifier: &str) -> RelayResult<SourceMetadata> {
        Ok(SourceMetadata {
            title: identifier.to_string(),
            channel: "unknown".to_string(),
            thumbnail: String::new(),
            duration_seconds: None,
        })
    }

    async fn spawn_stream(&self, _identifier: &str) -> RelayResult<Child> {
        Err(RelayError::ExtractorUnavailable(
            "NullExtractor cannot spawn a process".into(),
        ))
    }
}

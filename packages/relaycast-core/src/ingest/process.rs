//! Process-based [`Extractor`]/[`Transcoder`]: spawns an external extractor
//! binary (metadata lookup + raw stream) and an external transcoder binary
//! (stdin -> stdout plus an on-disk tee), the two out-of-scope collaborators
//! named in the design. Argument lists are templates; `{id}` and
//! `{capture_path}` are substituted per call, so the same binary can be
//! pointed at different extractor/transcoder CLIs without a code change.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::{Child, Command};

use super::{Extractor, SourceMetadata, Transcoder};
use crate::error::{RelayError, RelayResult};

/// Spawn configuration for the metadata/stream extractor binary.
#[derive(Debug, Clone)]
pub struct ProcessExtractorConfig {
    pub binary: String,
    /// Args for the metadata call, run with `--output json` semantics: the
    /// binary is expected to print a single JSON object to stdout.
    pub metadata_args: Vec<String>,
    /// Args for the raw-stream call; stdout is piped to the transcoder.
    pub stream_args: Vec<String>,
}

fn render(args: &[String], identifier: &str) -> Vec<String> {
    args.iter().map(|arg| arg.replace("{id}", identifier)).collect()
}

#[derive(Debug, Deserialize)]
struct ExtractorMetadataPayload {
    title: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    thumbnail: String,
    #[serde(default)]
    duration_seconds: Option<f64>,
}

/// Extractor backed by an external CLI binary.
pub struct ProcessExtractor {
    config: ProcessExtractorConfig,
}

impl ProcessExtractor {
    pub fn new(config: ProcessExtractorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Extractor for ProcessExtractor {
    async fn extract_metadata(&self, identifier: &str) -> RelayResult<SourceMetadata> {
        let args = render(&self.config.metadata_args, identifier);
        let output = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RelayError::ExtractorUnavailable(format!("spawn metadata lookup: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::ExtractorUnavailable(format!(
                "metadata lookup for {identifier} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let payload: ExtractorMetadataPayload = serde_json::from_slice(&output.stdout)
            .map_err(|e| RelayError::ExtractorUnavailable(format!("malformed metadata JSON: {e}")))?;

        Ok(SourceMetadata {
            title: payload.title,
            channel: payload.channel,
            thumbnail: payload.thumbnail,
            duration_seconds: payload.duration_seconds,
        })
    }

    async fn spawn_stream(&self, identifier: &str) -> RelayResult<Child> {
        let args = render(&self.config.stream_args, identifier);
        Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::ExtractorUnavailable(format!("spawn stream for {identifier}: {e}")))
    }
}

/// Spawn configuration for the transcoder binary.
#[derive(Debug, Clone)]
pub struct ProcessTranscoderConfig {
    pub binary: String,
    /// Args for the transcode call; `{capture_path}` is substituted with
    /// the destination tee file. The binary reads stdin and writes its
    /// primary output to stdout.
    pub args: Vec<String>,
}

/// Transcoder backed by an external CLI binary that tees its own output.
pub struct ProcessTranscoder {
    config: ProcessTranscoderConfig,
}

impl ProcessTranscoder {
    pub fn new(config: ProcessTranscoderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transcoder for ProcessTranscoder {
    async fn spawn(&self, stdin: Stdio, capture_path: &Path) -> RelayResult<Child> {
        let capture_path_str = capture_path.to_string_lossy().into_owned();
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| arg.replace("{capture_path}", &capture_path_str))
            .collect();

        Command::new(&self.config.binary)
            .args(&args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::ExtractorUnavailable(format!("spawn transcoder: {e}")))
    }
}

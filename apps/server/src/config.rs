//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Narrows down to [`relaycast_core::Config`] (the bounded tunables) plus
//! the paths/binaries/credentials `relaycast_core::BootstrapConfig` needs
//! and has no sensible numeric default for.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to; 0 auto-discovers in 49400-49410.
    /// Override: `RELAYCAST_BIND_PORT`
    pub bind_port: u16,

    /// SQLite database path for the queue/history/usage tables.
    /// Override: `RELAYCAST_DB_PATH`
    pub db_path: String,

    /// Directory captured audio files are written to.
    pub capture_dir: PathBuf,
    /// File extension appended to each capture file.
    pub capture_extension: String,
    /// Directory transcript cache JSON files are written to.
    pub transcript_cache_dir: PathBuf,
    /// Directory summary cache JSON files are written to.
    pub summary_cache_dir: PathBuf,
    /// Directory the backup sink falls back to on a failed publish.
    pub backup_dir: PathBuf,

    /// Extractor binary and its metadata/stream argument templates.
    pub extractor_binary: String,
    pub extractor_metadata_args: Vec<String>,
    pub extractor_stream_args: Vec<String>,

    /// Transcoder binary and its argument template.
    pub transcoder_binary: String,
    pub transcoder_args: Vec<String>,

    /// Transcription provider endpoint, credentials, and model name.
    /// Override: `RELAYCAST_TRANSCRIPTION_API_KEY`
    pub transcription_base_url: String,
    pub transcription_api_key: String,
    pub transcription_model: String,

    /// Summarization provider endpoint, credentials, and model name.
    /// Override: `RELAYCAST_SUMMARIZATION_API_KEY`
    pub summarization_base_url: String,
    pub summarization_api_key: String,
    pub summarization_model: String,

    /// External note-store endpoint and credentials.
    /// Override: `RELAYCAST_NOTE_STORE_API_KEY`
    pub note_store_base_url: String,
    pub note_store_api_key: String,

    /// Per-call timeout for transcription/summarization/note-store HTTP
    /// calls, in seconds.
    pub provider_request_timeout_secs: u64,

    /// The bounded tunables (buffer sizes, retry counts, timeouts).
    #[serde(flatten)]
    pub core: relaycast_core::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 0,
            db_path: "relaycast.db".to_string(),
            capture_dir: PathBuf::from("data/capture"),
            capture_extension: "ext".to_string(),
            transcript_cache_dir: PathBuf::from("data/transcripts"),
            summary_cache_dir: PathBuf::from("data/summaries"),
            backup_dir: PathBuf::from("data/backup"),
            extractor_binary: "relaycast-extractor".to_string(),
            extractor_metadata_args: vec!["metadata".to_string(), "{id}".to_string()],
            extractor_stream_args: vec!["stream".to_string(), "{id}".to_string()],
            transcoder_binary: "relaycast-transcoder".to_string(),
            transcoder_args: vec!["-o".to_string(), "{capture_path}".to_string()],
            transcription_base_url: String::new(),
            transcription_api_key: String::new(),
            transcription_model: String::new(),
            summarization_base_url: String::new(),
            summarization_api_key: String::new(),
            summarization_model: String::new(),
            note_store_base_url: String::new(),
            note_store_api_key: String::new(),
            provider_request_timeout_secs: 60,
            core: relaycast_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("RELAYCAST_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("RELAYCAST_DB_PATH") {
            self.db_path = val;
        }
        if let Ok(val) = std::env::var("RELAYCAST_TRANSCRIPTION_API_KEY") {
            self.transcription_api_key = val;
        }
        if let Ok(val) = std::env::var("RELAYCAST_SUMMARIZATION_API_KEY") {
            self.summarization_api_key = val;
        }
        if let Ok(val) = std::env::var("RELAYCAST_NOTE_STORE_API_KEY") {
            self.note_store_api_key = val;
        }
    }

    /// Builds the `relaycast_core::BootstrapConfig` consumed by `bootstrap`.
    pub fn to_bootstrap_config(&self) -> relaycast_core::BootstrapConfig {
        relaycast_core::BootstrapConfig {
            core: self.core.clone(),
            db_path: self.db_path.clone(),
            capture_dir: self.capture_dir.clone(),
            capture_extension: self.capture_extension.clone(),
            transcript_cache_dir: self.transcript_cache_dir.clone(),
            summary_cache_dir: self.summary_cache_dir.clone(),
            backup_dir: self.backup_dir.clone(),
            extractor: relaycast_core::ProcessExtractorConfig {
                binary: self.extractor_binary.clone(),
                metadata_args: self.extractor_metadata_args.clone(),
                stream_args: self.extractor_stream_args.clone(),
            },
            transcoder: relaycast_core::ProcessTranscoderConfig {
                binary: self.transcoder_binary.clone(),
                args: self.transcoder_args.clone(),
            },
            transcription_provider: relaycast_core::HttpProviderConfig {
                base_url: self.transcription_base_url.clone(),
                api_key: self.transcription_api_key.clone(),
                model: self.transcription_model.clone(),
            },
            summarization_provider: relaycast_core::HttpProviderConfig {
                base_url: self.summarization_base_url.clone(),
                api_key: self.summarization_api_key.clone(),
                model: self.summarization_model.clone(),
            },
            note_store_base_url: self.note_store_base_url.clone(),
            note_store_api_key: self.note_store_api_key.clone(),
            provider_request_timeout: std::time::Duration::from_secs(self.provider_request_timeout_secs),
        }
    }
}

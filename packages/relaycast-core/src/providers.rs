//! HTTP-backed [`TranscriptionProvider`], [`SummarizationProvider`], and
//! [`NoteStore`] collaborators. Each wraps a `reqwest::Client` and a base
//! URL/API key pair, translating provider responses into `RelayError`
//! through the same transient/non-transient split used everywhere else
//! (`reqwest::Error`'s `From` impl; a non-2xx status is folded in
//! explicitly since these providers return structured error bodies rather
//! than bare HTTP faults).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};
use crate::pipeline::{NoteStore, SummarizationProvider, SummarizationResult, TranscriptionProvider, TranscriptionResult};

fn status_to_error(status: StatusCode, body: String) -> RelayError {
    if status.as_u16() == 429 || status.is_server_error() {
        RelayError::ExternalUnavailable(format!("{status}: {body}"))
    } else {
        RelayError::ExternalRejected(format!("{status}: {body}"))
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

/// Config shared by every HTTP-backed provider: base URL, bearer token, and
/// the model name recorded on each [`crate::store::UsageRecord`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcription
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    duration_seconds: Option<f64>,
    #[serde(default)]
    prompt_tokens: Option<i64>,
    #[serde(default)]
    response_tokens: Option<i64>,
}

/// Uploads the capture file's bytes to a transcription HTTP API.
pub struct HttpTranscriptionProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl HttpTranscriptionProvider {
    pub fn new(client: Client, config: HttpProviderConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TranscriptionProvider for HttpTranscriptionProvider {
    fn provider_name(&self) -> &str {
        "http-transcription"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn transcribe(&self, audio_path: &Path) -> RelayResult<TranscriptionResult> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture.bin".to_string());

        let form = reqwest::multipart::Form::new()
            .text("model", self.config.model.clone())
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(format!("{}/v1/transcriptions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error(status, read_error_body(response).await));
        }

        let body: TranscribeResponse = response.json().await?;
        Ok(TranscriptionResult {
            text: body.text,
            audio_duration_seconds: body.duration_seconds,
            prompt_tokens: body.prompt_tokens,
            response_tokens: body.response_tokens,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summarization
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    text: String,
    #[serde(default)]
    prompt_tokens: Option<i64>,
    #[serde(default)]
    response_tokens: Option<i64>,
}

/// Sends a rendered prompt to a summarization HTTP API.
pub struct HttpSummarizationProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl HttpSummarizationProvider {
    pub fn new(client: Client, config: HttpProviderConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SummarizationProvider for HttpSummarizationProvider {
    fn provider_name(&self) -> &str {
        "http-summarization"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn summarize(&self, prompt: &str) -> RelayResult<SummarizationResult> {
        let response = self
            .client
            .post(format!("{}/v1/summaries", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&SummarizeRequest { model: &self.config.model, prompt })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error(status, read_error_body(response).await));
        }

        let body: SummarizeResponse = response.json().await?;
        Ok(SummarizationResult {
            text: body.text,
            prompt_tokens: body.prompt_tokens,
            response_tokens: body.response_tokens,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Note store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NoteSearchResponse {
    notes: Vec<NoteSummary>,
}

#[derive(Debug, Deserialize)]
struct NoteSummary {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateNoteRequest<'a> {
    title: &'a str,
    body: &'a str,
    mime: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateNoteResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct AddLabelRequest<'a> {
    name: &'a str,
    value: &'a str,
}

/// Note store backed by an external HTTP knowledge-base API.
pub struct HttpNoteStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpNoteStore {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self { client, base_url, api_key }
    }
}

#[async_trait]
impl NoteStore for HttpNoteStore {
    async fn find_by_label(&self, name: &str, value: &str) -> RelayResult<Option<String>> {
        let response = self
            .client
            .get(format!("{}/v1/notes/search", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("label_name", name), ("label_value", value)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error(status, read_error_body(response).await));
        }

        let body: NoteSearchResponse = response.json().await?;
        Ok(body.notes.into_iter().next().map(|note| note.id))
    }

    async fn create_note(&self, title: &str, body: &str, mime: &str) -> RelayResult<String> {
        let response = self
            .client
            .post(format!("{}/v1/notes", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&CreateNoteRequest { title, body, mime })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error(status, read_error_body(response).await));
        }

        let body: CreateNoteResponse = response.json().await?;
        Ok(body.id)
    }

    async fn add_label(&self, note_id: &str, name: &str, value: &str) -> RelayResult<()> {
        let response = self
            .client
            .post(format!("{}/v1/notes/{note_id}/labels", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&AddLabelRequest { name, value })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_to_error(status, read_error_body(response).await));
        }
        Ok(())
    }
}

/// Builds a `reqwest::Client` with the connect/request timeouts this
/// codebase uses everywhere an external device or service is reached.
pub fn build_http_client(timeout: Duration) -> RelayResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RelayError::Internal(format!("build http client: {e}")))
}

//! relaycast-core — shared library for relaycast.
//!
//! relaycast ingests a remote audio source, fans it out live to HTTP
//! clients, tees the captured audio to disk, and runs a sequential
//! transcribe-summarize-publish pipeline over each capture once it closes,
//! all driven through a persistent, auto-advancing play queue.
//!
//! # Architecture
//!
//! - [`ingest`]: resolves source metadata and tees a live byte stream into a
//!   capture file, one active session at a time
//! - [`broadcaster`]: fans the active session's bytes out to HTTP clients
//!   with replay buffering and per-client drop-oldest backpressure
//! - [`store`]: the persistent play queue, play history, and usage-record
//!   tables (SQLite via `sqlx`)
//! - [`jobs`]: the background job engine driving each capture through
//!   transcribe → summarize → publish
//! - [`pipeline`]: the individual post-capture stages and their collaborator
//!   traits (transcription/summarization providers, note store, backup sink)
//! - [`providers`]: HTTP-backed transcription/summarization/note-store
//!   collaborators
//! - [`retention`]: capture-directory disk space management
//! - [`coordinator`]: ties the above together behind the external command
//!   surface
//! - [`api`]: the HTTP surface (axum) exposing the coordinator's commands
//! - [`config`] / [`protocol_constants`]: tunables and their defaults
//! - [`error`]: the centralized error type and its HTTP mapping
//! - [`events`]: the event-emitter abstraction used for observability
//! - [`cache`]: atomic on-disk JSON read/write primitives
//! - [`bootstrap`]: wires every collaborator into a running [`coordinator::Coordinator`]

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod broadcaster;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod ingest;
pub mod jobs;
pub mod pipeline;
pub mod protocol_constants;
pub mod providers;
pub mod retention;
pub mod store;
pub mod utils;

pub use broadcaster::{Broadcaster, Subscription};
pub use config::Config;
pub use coordinator::{Coordinator, EnqueueItemResult, NextResult, StartStreamResult, StreamStatus};
pub use error::{ErrorCode, RelayError, RelayResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, LoggingEventEmitter, NoopEventEmitter};
pub use ingest::{
    Extractor, IngestOutcome, IngestSupervisor, ProcessExtractor, ProcessExtractorConfig,
    ProcessTranscoder, ProcessTranscoderConfig, SourceMetadata, Transcoder,
};
pub use jobs::{EnqueueOptions, Job, JobEngine, JobKind, JobState};
pub use providers::HttpProviderConfig;
pub use store::{HistoryEntry, PersistentStore, QueueEntry, UsageRecord};
pub use utils::{now_millis, validate_identifier, IdentifierError};

pub use bootstrap::{bootstrap, BootstrapConfig, BootstrappedServices};
pub use api::{start_server, AppState};

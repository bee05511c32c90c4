//! Fixed protocol constants and tunable defaults.
//!
//! Values here are the defaults consulted by [`crate::config::Config`]; most
//! are overridable via environment variables through
//! [`crate::config::parse_bounded_int`]. A few (retry delays, error kinds) are
//! fixed by the design and are not meant to be tuned per-deployment.

// ─────────────────────────────────────────────────────────────────────────────
// Broadcaster
// ─────────────────────────────────────────────────────────────────────────────

/// Default replay buffer capacity (chunks).
///
/// ~100 chunks gives reconnecting clients a few seconds of instant replay
/// without unbounded memory growth.
pub const DEFAULT_REPLAY_BUFFER_CHUNKS: usize = 100;

/// Default per-subscription bounded queue depth (chunks).
pub const DEFAULT_SUBSCRIPTION_QUEUE_CHUNKS: usize = 100;

/// Minimum and maximum bounds accepted for the two buffer sizes above.
pub const MIN_BUFFER_CHUNKS: i64 = 1;
pub const MAX_BUFFER_CHUNKS: i64 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Ingest pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Size of each chunk read from the transcoder's stdout.
///
/// 32KB balances syscall overhead against publish latency for a live stream.
pub const INGEST_CHUNK_SIZE_BYTES: usize = 32 * 1024;

/// Grace period between SIGTERM and SIGKILL when tearing down child processes.
pub const PROCESS_KILL_GRACE_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Job engine / pipeline stages
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum attempts for a retriable external call (initial attempt + 2 retries).
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Backoff delays between retries, in seconds: 2, 4 (base-2 exponential; the
/// third gap would be 8 but never occurs since `MAX_RETRY_ATTEMPTS` is 3).
pub const RETRY_DELAYS_SECS: [u64; 2] = [2, 4];

/// Bounded in-memory job table capacity (terminal jobs evicted beyond this).
pub const DEFAULT_JOB_TABLE_CAPACITY: usize = 500;

/// Default per-stage provider deadlines (seconds).
pub const DEFAULT_TRANSCRIBE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SUMMARIZE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Persistent queue / pre-fetch
// ─────────────────────────────────────────────────────────────────────────────

/// Default pre-fetch threshold: start warming the next item once the current
/// ingest has this many seconds of estimated playback remaining.
pub const DEFAULT_PRE_FETCH_THRESHOLD_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Capture retention
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of capture files retained (LRU by mtime).
pub const DEFAULT_CAPTURE_RETENTION_COUNT: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed length of an opaque `SourceItem` identifier.
pub const IDENTIFIER_LENGTH: usize = 11;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier exposed on the health endpoint.
pub const SERVICE_ID: &str = "relaycast";

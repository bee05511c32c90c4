//! Core configuration types.
//!
//! [`Config`] groups every tunable referenced elsewhere in this crate, with
//! sensible defaults from [`crate::protocol_constants`]. The server binary
//! loads a superset of this (bind address, data directories, provider
//! credentials) and narrows it down to a `Config` via `to_core_config`,
//! mirroring the split between a binary-level config and a library-level
//! config used throughout this codebase.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::*;

/// Configuration for the broadcaster.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Capacity of the shared replay buffer, in chunks.
    pub replay_buffer_chunks: usize,
    /// Capacity of each per-client subscription queue, in chunks.
    pub subscription_queue_chunks: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            replay_buffer_chunks: DEFAULT_REPLAY_BUFFER_CHUNKS,
            subscription_queue_chunks: DEFAULT_SUBSCRIPTION_QUEUE_CHUNKS,
        }
    }
}

impl BroadcasterConfig {
    /// Validates the configuration, rejecting zero-capacity buffers (a
    /// zero-depth bounded queue can never accept a chunk).
    pub fn validate(&self) -> Result<(), String> {
        if self.replay_buffer_chunks == 0 {
            return Err("replay_buffer_chunks must be >= 1".to_string());
        }
        if self.subscription_queue_chunks == 0 {
            return Err("subscription_queue_chunks must be >= 1".to_string());
        }
        Ok(())
    }
}

/// Configuration for the ingest pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Size of each chunk read from the transcoder's stdout, in bytes.
    pub chunk_size_bytes: usize,
    /// Grace period between SIGTERM and SIGKILL when tearing down children.
    pub kill_grace_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: INGEST_CHUNK_SIZE_BYTES,
            kill_grace_secs: PROCESS_KILL_GRACE_SECS,
        }
    }
}

/// Configuration for the background job engine and pipeline stages.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct JobConfig {
    /// Bounded in-memory job table capacity.
    pub job_table_capacity: usize,
    /// Per-stage provider deadlines, in seconds.
    pub transcribe_timeout_secs: u64,
    pub summarize_timeout_secs: u64,
    pub publish_timeout_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_table_capacity: DEFAULT_JOB_TABLE_CAPACITY,
            transcribe_timeout_secs: DEFAULT_TRANSCRIBE_TIMEOUT_SECS,
            summarize_timeout_secs: DEFAULT_SUMMARIZE_TIMEOUT_SECS,
            publish_timeout_secs: DEFAULT_PUBLISH_TIMEOUT_SECS,
        }
    }
}

/// Configuration for persistent-queue pre-fetch and capture retention.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// Seconds of estimated playback remaining at which pre-fetch triggers.
    pub pre_fetch_threshold_secs: u64,
    /// Number of capture files retained (LRU by mtime).
    pub capture_retention_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pre_fetch_threshold_secs: DEFAULT_PRE_FETCH_THRESHOLD_SECS,
            capture_retention_count: DEFAULT_CAPTURE_RETENTION_COUNT,
        }
    }
}

/// Top-level core configuration, composed of the per-component configs above.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub broadcaster: BroadcasterConfig,
    pub ingest: IngestConfig,
    pub jobs: JobConfig,
    pub queue: QueueConfig,
    /// Capacity of the internal event-notification broadcast channel.
    pub event_channel_capacity: usize,
}

/// Parses an environment-variable string as an integer bounded by `[min, max]`.
///
/// On parse failure or out-of-range value, logs a warning and returns
/// `default`. A malformed configuration value must never crash the process.
///
/// # Examples
///
/// ```
/// use relaycast_core::config::parse_bounded_int;
///
/// assert_eq!(parse_bounded_int("abc", 42, 1, 100), 42);
/// assert_eq!(parse_bounded_int("9999", 42, 1, 100), 42);
/// assert_eq!(parse_bounded_int("50", 42, 1, 100), 50);
/// ```
pub fn parse_bounded_int(value: &str, default: i64, min: i64, max: i64) -> i64 {
    match value.parse::<i64>() {
        Ok(parsed) if parsed >= min && parsed <= max => parsed,
        Ok(parsed) => {
            log::warn!(
                "config value '{value}' ({parsed}) out of range [{min}, {max}]; using default {default}"
            );
            default
        }
        Err(_) => {
            log::warn!("config value '{value}' is not an integer; using default {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcaster_config_default_is_valid() {
        assert!(BroadcasterConfig::default().validate().is_ok());
    }

    #[test]
    fn broadcaster_config_rejects_zero_values() {
        let mut config = BroadcasterConfig::default();
        config.replay_buffer_chunks = 0;
        assert!(config.validate().is_err());

        let mut config = BroadcasterConfig::default();
        config.subscription_queue_chunks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(
            config.broadcaster.replay_buffer_chunks,
            DEFAULT_REPLAY_BUFFER_CHUNKS
        );
        assert_eq!(config.jobs.job_table_capacity, DEFAULT_JOB_TABLE_CAPACITY);
    }

    #[test]
    fn parse_bounded_int_falls_back_on_non_numeric() {
        assert_eq!(parse_bounded_int("abc", 42, 1, 100), 42);
    }

    #[test]
    fn parse_bounded_int_falls_back_on_out_of_range() {
        assert_eq!(parse_bounded_int("9999", 42, 1, 100), 42);
    }

    #[test]
    fn parse_bounded_int_accepts_in_range() {
        assert_eq!(parse_bounded_int("50", 42, 1, 100), 50);
    }

    #[test]
    fn parse_bounded_int_accepts_boundary_values() {
        assert_eq!(parse_bounded_int("1", 42, 1, 100), 1);
        assert_eq!(parse_bounded_int("100", 42, 1, 100), 100);
    }
}

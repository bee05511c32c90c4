//! Atomic JSON cache primitives and a lazy-singleton helper.
//!
//! These are the two concurrency primitives the design calls out explicitly:
//! an atomic on-disk write (tmp file + rename, never a torn read) and a
//! check-lock-recheck lazy singleton with an idempotent teardown hook.

use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{RelayError, RelayResult};

/// Global mutex serializing every atomic JSON write in the process.
///
/// A single process-wide lock is coarser than one-per-path, but every writer
/// in this design (transcript cache, summary cache, backup sink) writes
/// distinct, identifier-keyed files rarely enough that contention is not a
/// concern; the real requirement is that no reader ever observes a
/// half-written file, which `write_atomic` guarantees independent of the lock.
static CACHE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn cache_lock() -> &'static Mutex<()> {
    CACHE_LOCK.get_or_init(|| Mutex::new(()))
}

/// Atomically writes `value` as JSON to `path`: serialize, write to
/// `path.tmp`, then rename over `path`. A reader opening `path` at any
/// instant sees either the previous full content or the new full content,
/// never a truncation, because `rename` is atomic on the same filesystem.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> RelayResult<()> {
    let _guard = cache_lock().lock();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension(
        path.extension()
            .map(|ext| format!("{}.tmp", ext.to_string_lossy()))
            .unwrap_or_else(|| "tmp".to_string()),
    );
    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| RelayError::Internal(format!("serialize {}: {e}", path.display())))?;
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads and deserializes JSON from `path`, returning `Ok(None)` if the file
/// does not exist (treated as "no cached value", not an error).
pub fn read_json<T: DeserializeOwned>(path: &Path) -> RelayResult<Option<T>> {
    let _guard = cache_lock().lock();
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let value = serde_json::from_str(&contents)
                .map_err(|e| RelayError::Internal(format!("parse {}: {e}", path.display())))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Check-lock-recheck lazy singleton with an idempotent `close()`.
///
/// Wraps any value behind a one-shot initializer so pooled external clients
/// (HTTP client, provider SDKs) are created at most once, lazily, and torn
/// down exactly once at process shutdown regardless of how many callers
/// invoke `close()`.
pub struct LazySingleton<T> {
    cell: std::sync::OnceLock<T>,
    closed: std::sync::atomic::AtomicBool,
}

impl<T> LazySingleton<T> {
    /// Creates an empty singleton; the value is created on first access.
    pub const fn new() -> Self {
        Self {
            cell: std::sync::OnceLock::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Returns the singleton, initializing it with `init` on first access.
    ///
    /// "Check, lock, re-check": `OnceLock::get_or_init` itself performs the
    /// check-lock-recheck dance under a single internal lock, so concurrent
    /// callers racing on first access all block on the same initialization
    /// rather than constructing the value twice.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        self.cell.get_or_init(init)
    }

    /// Marks the singleton closed. Returns `true` the first time this is
    /// called, `false` on every subsequent call — callers use this to run
    /// teardown logic (closing pooled connections) exactly once.
    pub fn close(&self) -> bool {
        self.closed
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_ok()
    }
}

impl<T> Default for LazySingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        write_atomic(&path, &Sample { value: 7 }).unwrap();
        let read: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(read, Some(Sample { value: 7 }));
    }

    #[test]
    fn read_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn write_atomic_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_atomic(&path, &Sample { value: 1 }).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert!(path.exists());
    }

    #[test]
    fn lazy_singleton_initializes_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let singleton: LazySingleton<u32> = LazySingleton::new();

        let a = *singleton.get_or_init(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            1
        });
        let b = *singleton.get_or_init(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            2
        });

        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_singleton_close_is_idempotent() {
        let singleton: LazySingleton<u32> = LazySingleton::new();
        assert!(singleton.close());
        assert!(!singleton.close());
    }
}

//! Capture directory retention: keeps only the most-recently-modified
//! capture files, evicting the rest. Runs off the hot path — the ingest
//! and job-engine code paths only ever call [`sweep`] from a spawned task,
//! never inline, so a slow or failing filesystem never stalls a publish.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Deletes the oldest-by-mtime capture files once the directory holds more
/// than `keep` entries. Best-effort: a single file's metadata or removal
/// failing is logged and skipped, not propagated.
pub async fn sweep(capture_dir: &Path, keep: usize) {
    let dir = capture_dir.to_path_buf();
    let result = tokio::task::spawn_blocking(move || sweep_blocking(&dir, keep)).await;
    match result {
        Ok(Ok(removed)) => {
            if removed > 0 {
                log::debug!("capture retention removed {removed} file(s) from {capture_dir:?}");
            }
        }
        Ok(Err(err)) => log::warn!("capture retention sweep of {capture_dir:?} failed: {err}"),
        Err(err) => log::warn!("capture retention sweep task join error: {err}"),
    }
}

fn sweep_blocking(capture_dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut entries: Vec<(PathBuf, SystemTime)> = Vec::new();
    let read_dir = match std::fs::read_dir(capture_dir) {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    for entry in read_dir {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                log::warn!("capture retention: skipping {:?}: {err}", entry.path());
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((entry.path(), modified));
    }

    if entries.len() <= keep {
        return Ok(0);
    }

    entries.sort_by_key(|(_, modified)| *modified);
    let overflow = entries.len() - keep;
    let mut removed = 0;
    for (path, _) in entries.into_iter().take(overflow) {
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => log::warn!("capture retention: failed to remove {path:?}: {err}"),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[tokio::test]
    async fn keeps_most_recent_n_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            let path = dir.path().join(format!("file-{i}.ext"));
            fs::write(&path, b"x").unwrap();
            // Ensure distinct mtimes across platforms with coarse timestamp
            // resolution.
            let mtime = SystemTime::now() + Duration::from_secs(i as u64);
            set_mtime(&path, mtime);
        }

        sweep(dir.path(), 3).await;

        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&"file-2.ext".to_string()));
        assert!(remaining.contains(&"file-3.ext".to_string()));
        assert!(remaining.contains(&"file-4.ext".to_string()));
    }

    #[tokio::test]
    async fn no_op_when_under_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only.ext"), b"x").unwrap();
        sweep(dir.path(), 10).await;
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn missing_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        sweep(&missing, 3).await;
    }

    fn set_mtime(path: &Path, t: SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(t).unwrap();
    }
}

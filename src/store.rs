// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File store primitives shared by every on-disk structure.
//!
//! Three concerns live here:
//!
//! - **Atomic writes**: write-to-temp + rename so readers never observe a
//!   half-written file.
//! - **Advisory locks**: `fs2` exclusive locks on a sibling `.lock` file,
//!   acquired with a bounded retry loop. Exceeding the timeout is fatal to
//!   the operation ([`StoreError::ConcurrencyTimeout`]), never silently
//!   ignored.
//! - **Path sanitization**: user-supplied names become safe single path
//!   segments before they touch the filesystem.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;

/// Hard timeout for advisory lock acquisition.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(1);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// An exclusive advisory lock on a file, released on drop.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, creating the file if needed.
    ///
    /// Retries until [`LOCK_TIMEOUT`] elapses, then fails with
    /// `ConcurrencyTimeout`.
    pub fn acquire(path: &Path) -> Result<Self, StoreError> {
        Self::acquire_with_timeout(path, LOCK_TIMEOUT)
    }

    /// Acquire with an explicit timeout (tests use shorter ones).
    pub fn acquire_with_timeout(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(_) if start.elapsed() < timeout => {
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(_) => {
                    return Err(StoreError::ConcurrencyTimeout {
                        path: path.display().to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            debug!("failed to release lock on {:?}: {}", self.path, e);
        }
    }
}

/// The conventional lock file sitting next to a data file.
pub fn lock_path_for(data_path: &Path) -> PathBuf {
    let stem = data_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    data_path.with_file_name(format!("{stem}.lock"))
}

/// Write `content` to `path` atomically (temp file in the same directory,
/// then rename over the target).
pub fn atomic_write(path: &Path, content: &str) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        std::process::id()
    ));

    let write_result = std::fs::write(&tmp_path, content)
        .and_then(|_| std::fs::rename(&tmp_path, path));

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StoreError::Io(e));
    }
    Ok(())
}

/// Serialize `value` as pretty JSON (UTF-8, trailing newline) and write it
/// atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    atomic_write(path, &content)
}

/// Read and deserialize a JSON file. `Ok(None)` when the file is absent.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Sanitize a user-supplied name into a safe single path segment.
///
/// Replaces `< > : " / \ | ? *` with `_`, strips leading/trailing whitespace
/// and dots; an empty result becomes the literal `entry`.
pub fn sanitize_path_segment(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = replaced
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string();

    if trimmed.is_empty() {
        "entry".to_string()
    } else {
        trimmed
    }
}

/// Sanitize a label for use inside a file name (task files): lowercase
/// alphanumerics, `_` and `-` only.
pub fn sanitize_file_part(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_sep = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let cleaned = out.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("data.json");

        atomic_write_json(&path, &serde_json::json!({"key": "value"})).unwrap();

        let parsed: Option<serde_json::Value> = read_json(&path).unwrap();
        assert_eq!(parsed.unwrap()["key"], "value");
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.txt");
        atomic_write(&path, "hello").unwrap();
        atomic_write(&path, "world").unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "world");
    }

    #[test]
    fn test_read_json_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let parsed: Option<serde_json::Value> =
            read_json(&temp.path().join("missing.json")).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_lock_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("data.lock");

        {
            let _lock = FileLock::acquire(&lock_path).unwrap();
            // Held; a second handle in the same process would still succeed
            // on some platforms, so contention is tested cross-process only.
        }

        // Released on drop; reacquire must succeed immediately.
        let _lock = FileLock::acquire(&lock_path).unwrap();
    }

    #[test]
    fn test_lock_timeout_reports_path() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("busy.lock");

        // Hold the lock from a child process so try_lock_exclusive fails here.
        let mut child = std::process::Command::new("flock")
            .arg(&lock_path)
            .args(["-c", "sleep 5"])
            .spawn()
            .expect("spawn flock");

        // Give the child a moment to grab the lock.
        std::thread::sleep(Duration::from_millis(200));

        let result = FileLock::acquire_with_timeout(&lock_path, Duration::from_millis(300));
        let _ = child.kill();
        let _ = child.wait();

        match result {
            Err(StoreError::ConcurrencyTimeout { path, .. }) => {
                assert!(path.contains("busy.lock"));
            }
            Ok(_) => {
                // flock binary unavailable in some environments; nothing to
                // assert then.
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lock_path_for() {
        let path = lock_path_for(Path::new("/tmp/dashboard/dashboard.md"));
        assert_eq!(path, PathBuf::from("/tmp/dashboard/dashboard.lock"));
    }

    #[test]
    fn test_sanitize_path_segment() {
        assert_eq!(sanitize_path_segment("worker-1"), "worker-1");
        assert_eq!(sanitize_path_segment("../../etc"), ".._.._etc");
        assert_eq!(sanitize_path_segment("a<b>c:d"), "a_b_c_d");
        assert_eq!(sanitize_path_segment("  ..  "), "entry");
        assert_eq!(sanitize_path_segment(""), "entry");
        assert_eq!(sanitize_path_segment("...name..."), "name");
    }

    #[test]
    fn test_sanitized_segment_stays_in_parent() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("ipc");
        let segment = sanitize_path_segment("../../etc");
        let joined = base.join(&segment);
        assert!(joined.starts_with(&base));
        assert!(!segment.contains('/'));
    }

    #[test]
    fn test_sanitize_file_part() {
        assert_eq!(sanitize_file_part("Claude Worker #3"), "claude_worker_3");
        assert_eq!(sanitize_file_part("__x__"), "x");
        assert_eq!(sanitize_file_part("!!!"), "unknown");
    }
}

// =============================================================================
// Persistence — atomic JSON snapshots + append-only JSONL logs
// =============================================================================
//
// Two write patterns used throughout the engine:
//   - atomic_write_json: tmp file + rename, for files that must never be
//     observed half-written (engine_state.json, runtime config).
//   - JsonlWriter: single-writer append-only log (trades, markers, crash).
//
// Both are synchronous; callers from async contexts run them via
// `spawn_blocking` or accept the (small, local-disk) blocking cost inline,
// matching the teacher's convention of keeping config save() synchronous.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

/// Write `value` to `path` as pretty JSON using a tmp-file + rename, so a
/// concurrent reader never observes a partially written file.
pub fn atomic_write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let content = serde_json::to_string_pretty(value).context("failed to serialize to JSON")?;

    let tmp_path = tmp_sibling(path);
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp file {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp file to {}", path.display()))?;

    info!(path = %path.display(), "atomic json write complete");
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

/// Read and parse a JSON file, returning `Ok(None)` if it does not exist.
pub fn read_json_opt<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Append-only JSONL writer with single-writer discipline. One object per
/// line, newline-terminated.
pub struct JsonlWriter {
    path: PathBuf,
}

impl JsonlWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record as a single JSON line. On write failure, logs and
    /// returns the error; callers keep running on the last good in-memory
    /// state rather than treating this as fatal, per the error taxonomy.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
        }

        let line = serde_json::to_string(record).context("failed to serialize jsonl record")?;

        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {} for append", self.path.display()))?;

        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", self.path.display()))?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    #[test]
    fn atomic_write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/state.json");
        let value = Sample {
            a: 7,
            b: "hi".into(),
        };
        atomic_write_json(&path, &value).unwrap();
        assert!(!tmp_sibling(&path).exists());
        let loaded: Option<Sample> = read_json_opt(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn read_json_opt_missing_file_is_none() {
        let loaded: Option<Sample> = read_json_opt("/nonexistent/file.json").unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn jsonl_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/trades.jsonl");
        let writer = JsonlWriter::new(&path);
        writer.append(&Sample { a: 1, b: "x".into() }).unwrap();
        writer.append(&Sample { a: 2, b: "y".into() }).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Sample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.a, 1);
    }
}

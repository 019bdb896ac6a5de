//! JSON persistence helpers.
//!
//! Every state file the filter owns is rewritten whole through a temp file in
//! the same directory followed by a rename, so a monitor polling the file
//! never observes a half-written document.

use crate::error::{FilterError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Atomic write via temp file + rename
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let persist_err = |source| FilterError::Persist {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(parent).map_err(persist_err)?;
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    if let Err(source) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(persist_err(source));
    }
    fs::rename(&temp_path, path).map_err(|source| {
        let _ = fs::remove_file(&temp_path);
        persist_err(source)
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Read a JSON document, `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Write one JSON object per line, atomically.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    atomic_write(path, out.as_bytes())
}

/// Read one JSON object per line. Blank lines are skipped; a missing file is empty.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

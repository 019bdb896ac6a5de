//! Per-file classification state.
//!
//! The registry is the only writer of [`FileRecord`] status. Every
//! classification is persisted immediately, so a crashed or interrupted run
//! picks up where it stopped as long as the file sets are unchanged.

use crate::error::{FilterError, Result};
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const FILES_STATUS_FILE: &str = "files_status.json";

/// Classification of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Unclassified,
    Accepted,
    Rejected,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Unclassified => "unclassified",
            FileStatus::Accepted => "accepted",
            FileStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unclassified" => Ok(FileStatus::Unclassified),
            "accepted" => Ok(FileStatus::Accepted),
            "rejected" => Ok(FileStatus::Rejected),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub status: FileStatus,
    /// Empty exactly when `status` is `Unclassified`.
    #[serde(default)]
    pub reason: String,
    /// Measured mean loss, for files classified by scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
}

impl FileRecord {
    fn unclassified(path: &str) -> Self {
        Self {
            path: path.to_string(),
            status: FileStatus::Unclassified,
            reason: String::new(),
            loss: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub unclassified: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// On-disk form of the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStatus {
    pub fingerprint: String,
    pub updated_at: DateTime<Utc>,
    pub train: Vec<FileRecord>,
    pub test: Vec<FileRecord>,
}

/// Train/test file records for one run, keyed by path.
#[derive(Debug)]
pub struct FileStatusRegistry {
    path: PathBuf,
    fingerprint: String,
    train: Vec<FileRecord>,
    index: HashMap<String, usize>,
    test: Vec<FileRecord>,
}

impl FileStatusRegistry {
    /// Build records for the given sets, restoring statuses from `path` when
    /// it was written for the same fingerprint.
    pub fn load(
        path: &Path,
        fingerprint: &str,
        train_files: &[String],
        test_files: &[String],
    ) -> Result<Self> {
        let mut train: Vec<FileRecord> =
            train_files.iter().map(|p| FileRecord::unclassified(p)).collect();
        let test = test_files.iter().map(|p| FileRecord::unclassified(p)).collect();

        let previous: Option<PersistedStatus> = store::read_json(path)?;
        match previous {
            Some(prev) if prev.fingerprint == fingerprint => {
                let restored: HashMap<String, FileRecord> = prev
                    .train
                    .into_iter()
                    .filter(|r| r.status != FileStatus::Unclassified)
                    .map(|r| (r.path.clone(), r))
                    .collect();
                let mut count = 0;
                for record in train.iter_mut() {
                    if let Some(old) = restored.get(&record.path) {
                        record.status = old.status;
                        record.reason = old.reason.clone();
                        record.loss = old.loss;
                        count += 1;
                    }
                }
                info!("Restored {} file statuses from previous run", count);
            }
            Some(_) => info!("File sets changed since last run, statuses reset"),
            None => debug!("No previous file statuses at {}", path.display()),
        }

        let index = train
            .iter()
            .enumerate()
            .map(|(i, r)| (r.path.clone(), i))
            .collect();

        let registry = Self {
            path: path.to_path_buf(),
            fingerprint: fingerprint.to_string(),
            train,
            index,
            test,
        };
        registry.persist()?;
        Ok(registry)
    }

    /// Read the persisted registry without touching it.
    pub fn read_persisted(path: &Path) -> Result<Option<PersistedStatus>> {
        store::read_json(path)
    }

    /// Unclassified train files, in input order.
    pub fn unclassified_train_files(&self) -> Vec<String> {
        self.paths_with(FileStatus::Unclassified)
    }

    pub fn accepted_train_files(&self) -> Vec<String> {
        self.paths_with(FileStatus::Accepted)
    }

    pub fn rejected_train_files(&self) -> Vec<String> {
        self.paths_with(FileStatus::Rejected)
    }

    pub fn accept(&mut self, path: &str, reason: &str) -> Result<()> {
        self.classify(path, FileStatus::Accepted, reason, None)
    }

    pub fn reject(&mut self, path: &str, reason: &str) -> Result<()> {
        self.classify(path, FileStatus::Rejected, reason, None)
    }

    /// Classify a scored file, keeping its measured loss with the record.
    pub fn classify_scored(
        &mut self,
        path: &str,
        status: FileStatus,
        loss: f64,
        reason: &str,
    ) -> Result<()> {
        self.classify(path, status, reason, Some(loss))
    }

    /// Mean measured loss over every accepted file that was scored,
    /// including files restored from an earlier, interrupted run.
    pub fn accepted_mean_loss(&self) -> Option<f64> {
        let losses: Vec<f64> = self
            .train
            .iter()
            .filter(|r| r.status == FileStatus::Accepted)
            .filter_map(|r| r.loss)
            .collect();
        if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f64>() / losses.len() as f64)
        }
    }

    pub fn record(&self, path: &str) -> Option<&FileRecord> {
        self.index.get(path).map(|&i| &self.train[i])
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.train {
            match record.status {
                FileStatus::Unclassified => counts.unclassified += 1,
                FileStatus::Accepted => counts.accepted += 1,
                FileStatus::Rejected => counts.rejected += 1,
            }
        }
        counts
    }

    fn paths_with(&self, status: FileStatus) -> Vec<String> {
        self.train
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.path.clone())
            .collect()
    }

    fn classify(
        &mut self,
        path: &str,
        status: FileStatus,
        reason: &str,
        loss: Option<f64>,
    ) -> Result<()> {
        let idx = *self
            .index
            .get(path)
            .ok_or_else(|| FilterError::UnknownFile(path.to_string()))?;
        let record = &mut self.train[idx];
        if record.status != FileStatus::Unclassified {
            return Err(FilterError::AlreadyClassified {
                path: path.to_string(),
                status: record.status.as_str(),
            });
        }

        record.status = status;
        record.reason = if reason.is_empty() {
            status.as_str().to_string()
        } else {
            reason.to_string()
        };
        record.loss = loss;
        debug!("{} {}: {}", status, path, record.reason);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        store::write_json(
            &self.path,
            &PersistedStatus {
                fingerprint: self.fingerprint.clone(),
                updated_at: Utc::now(),
                train: self.train.clone(),
                test: self.test.clone(),
            },
        )
    }
}

//! Train/test file sets and their on-disk layout.
//!
//! # Storage Format
//!
//! ```text
//! <data_dir>/
//! ├── unfiltered_train_set.jsonl   input, one {"path": ...} per line
//! ├── unfiltered_test_set.jsonl    input, optional
//! ├── train_set_filtered.jsonl     output, accepted train files
//! ├── test_set_filtered.jsonl      output, test files carried through
//! └── filter_meta.json             output, fingerprint of the filtered inputs
//! ```

use crate::config::{FilterConfig, ForceRules};
use crate::error::Result;
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const UNFILTERED_TRAIN_SET: &str = "unfiltered_train_set.jsonl";
pub const UNFILTERED_TEST_SET: &str = "unfiltered_test_set.jsonl";
pub const FILTERED_TRAIN_SET: &str = "train_set_filtered.jsonl";
pub const FILTERED_TEST_SET: &str = "test_set_filtered.jsonl";
pub const FILTER_META: &str = "filter_meta.json";

/// One corpus entry. Extra keys from the corpus index are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FileEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Written next to the filtered sets once a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterMeta {
    pub fingerprint: String,
    pub train_accepted: usize,
    pub test_count: usize,
    pub filtered_at: DateTime<Utc>,
}

/// Train and test sets for one run.
#[derive(Debug, Clone)]
pub struct FileSets {
    data_dir: PathBuf,
    train: Vec<FileEntry>,
    test: Vec<FileEntry>,
    fingerprint: String,
}

impl FileSets {
    /// Read the unfiltered sets from `data_dir`, autoselecting test files if needed.
    pub fn load(data_dir: &Path, config: &FilterConfig, rules: &ForceRules) -> Result<Self> {
        let train = dedup(store::read_jsonl(&data_dir.join(UNFILTERED_TRAIN_SET))?, "train");
        let test = dedup(store::read_jsonl(&data_dir.join(UNFILTERED_TEST_SET))?, "test");
        Ok(Self::from_entries(data_dir, train, test, config, rules))
    }

    /// Build file sets from in-memory entries.
    pub fn from_entries(
        data_dir: &Path,
        train: Vec<FileEntry>,
        test: Vec<FileEntry>,
        config: &FilterConfig,
        rules: &ForceRules,
    ) -> Self {
        let (train, test) = if test.is_empty() {
            autoselect_test_files(train, config.autoselect_test_files_num)
        } else {
            (train, test)
        };
        let fingerprint = compute_fingerprint(&train, &test, config, rules);
        info!(
            "File sets: {} train, {} test (fingerprint {})",
            train.len(),
            test.len(),
            &fingerprint[..12]
        );
        Self {
            data_dir: data_dir.to_path_buf(),
            train,
            test,
            fingerprint,
        }
    }

    pub fn train_files(&self) -> Vec<String> {
        self.train.iter().map(|e| e.path.clone()).collect()
    }

    pub fn test_files(&self) -> Vec<String> {
        self.test.iter().map(|e| e.path.clone()).collect()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// True when the filtered output on disk was produced from these exact inputs.
    pub fn is_up_to_date(&self) -> bool {
        let meta: Option<FilterMeta> = match store::read_json(&self.data_dir.join(FILTER_META)) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", FILTER_META, e);
                None
            }
        };
        match meta {
            Some(meta) => {
                meta.fingerprint == self.fingerprint
                    && self.data_dir.join(FILTERED_TRAIN_SET).exists()
                    && self.data_dir.join(FILTERED_TEST_SET).exists()
            }
            None => false,
        }
    }

    /// Write the accepted train files, the test set, and the fingerprint.
    ///
    /// The meta file goes last so an interrupted dump is never mistaken for a
    /// finished one.
    pub fn dump_filtered(&self, accepted: &[String]) -> Result<()> {
        let accepted: HashSet<&str> = accepted.iter().map(String::as_str).collect();
        let filtered: Vec<&FileEntry> = self
            .train
            .iter()
            .filter(|e| accepted.contains(e.path.as_str()))
            .collect();

        store::write_jsonl(&self.data_dir.join(FILTERED_TRAIN_SET), &filtered)?;
        store::write_jsonl(&self.data_dir.join(FILTERED_TEST_SET), &self.test)?;
        store::write_json(
            &self.data_dir.join(FILTER_META),
            &FilterMeta {
                fingerprint: self.fingerprint.clone(),
                train_accepted: filtered.len(),
                test_count: self.test.len(),
                filtered_at: Utc::now(),
            },
        )?;
        info!(
            "Dumped {} train and {} test files to {}",
            filtered.len(),
            self.test.len(),
            self.data_dir.display()
        );
        Ok(())
    }
}

fn dedup(entries: Vec<FileEntry>, label: &str) -> Vec<FileEntry> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen.insert(entry.path.clone()) {
            out.push(entry);
        } else {
            warn!("Duplicate {} path dropped: {}", label, entry.path);
        }
    }
    out
}

/// Move `count` train files to the test set.
///
/// Selection is by smallest blake3 hash of the path, so it is stable across
/// runs and independent of input order. Skipped when it would empty the train set.
fn autoselect_test_files(train: Vec<FileEntry>, count: usize) -> (Vec<FileEntry>, Vec<FileEntry>) {
    if count == 0 {
        return (train, Vec::new());
    }
    if train.len() <= count {
        warn!(
            "Not enough train files ({}) to autoselect {} test files, test set stays empty",
            train.len(),
            count
        );
        return (train, Vec::new());
    }

    let mut ranked: Vec<(blake3::Hash, &str)> = train
        .iter()
        .map(|e| (blake3::hash(e.path.as_bytes()), e.path.as_str()))
        .collect();
    ranked.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    let chosen: HashSet<String> = ranked
        .into_iter()
        .take(count)
        .map(|(_, path)| path.to_string())
        .collect();

    let (test, train): (Vec<_>, Vec<_>) =
        train.into_iter().partition(|e| chosen.contains(&e.path));
    info!("Autoselected {} test files", test.len());
    (train, test)
}

fn compute_fingerprint(
    train: &[FileEntry],
    test: &[FileEntry],
    config: &FilterConfig,
    rules: &ForceRules,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for (label, entries) in [("train", train), ("test", test)] {
        hasher.update(label.as_bytes());
        hasher.update(&(entries.len() as u64).to_le_bytes());
        for entry in entries {
            hasher.update(entry.path.as_bytes());
            hasher.update(&[0]);
        }
    }
    hasher.update(&config.filter_loss_threshold.to_bits().to_le_bytes());
    hasher.update(rules.force_include.as_bytes());
    hasher.update(&[0]);
    hasher.update(rules.force_exclude.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries(paths: &[&str]) -> Vec<FileEntry> {
        paths.iter().map(|p| FileEntry::new(*p)).collect()
    }

    fn no_autoselect() -> FilterConfig {
        let mut config = FilterConfig::new(1.0);
        config.autoselect_test_files_num = 0;
        config
    }

    #[test]
    fn test_load_reads_jsonl_and_keeps_extras() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(UNFILTERED_TRAIN_SET),
            "{\"path\":\"a.txt\",\"size\":10}\n{\"path\":\"b.txt\"}\n{\"path\":\"a.txt\"}\n",
        )
        .unwrap();
        std::fs::write(temp.path().join(UNFILTERED_TEST_SET), "{\"path\":\"t.txt\"}\n").unwrap();

        let sets = FileSets::load(temp.path(), &FilterConfig::new(1.0), &ForceRules::default())
            .unwrap();
        assert_eq!(sets.train_files(), vec!["a.txt", "b.txt"]);
        assert_eq!(sets.test_files(), vec!["t.txt"]);
        assert_eq!(sets.train[0].extra.get("size"), Some(&serde_json::json!(10)));
    }

    #[test]
    fn test_autoselect_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let config = FilterConfig::new(1.0);
        let paths = ["a", "b", "c", "d", "e", "f"];
        let forward = FileSets::from_entries(
            temp.path(),
            entries(&paths),
            Vec::new(),
            &config,
            &ForceRules::default(),
        );
        let mut reversed_paths = paths;
        reversed_paths.reverse();
        let reversed = FileSets::from_entries(
            temp.path(),
            entries(&reversed_paths),
            Vec::new(),
            &config,
            &ForceRules::default(),
        );

        assert_eq!(forward.test_files().len(), 3);
        assert_eq!(forward.train_files().len(), 3);
        let mut a = forward.test_files();
        let mut b = reversed.test_files();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_autoselect_skipped_for_tiny_train_set() {
        let temp = TempDir::new().unwrap();
        let sets = FileSets::from_entries(
            temp.path(),
            entries(&["a", "b"]),
            Vec::new(),
            &FilterConfig::new(1.0),
            &ForceRules::default(),
        );
        assert_eq!(sets.train_files().len(), 2);
        assert!(sets.test_files().is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_membership_and_settings() {
        let temp = TempDir::new().unwrap();
        let rules = ForceRules::default();
        let config = no_autoselect();
        let base = FileSets::from_entries(temp.path(), entries(&["a", "b"]), Vec::new(), &config, &rules);
        let same = FileSets::from_entries(temp.path(), entries(&["a", "b"]), Vec::new(), &config, &rules);
        let more = FileSets::from_entries(temp.path(), entries(&["a", "b", "c"]), Vec::new(), &config, &rules);
        let include = ForceRules {
            force_include: "*.md".into(),
            force_exclude: String::new(),
        };
        let ruled = FileSets::from_entries(temp.path(), entries(&["a", "b"]), Vec::new(), &config, &include);
        let mut stricter = no_autoselect();
        stricter.filter_loss_threshold = 0.5;
        let tuned = FileSets::from_entries(temp.path(), entries(&["a", "b"]), Vec::new(), &stricter, &rules);

        assert_eq!(base.fingerprint(), same.fingerprint());
        assert_ne!(base.fingerprint(), more.fingerprint());
        assert_ne!(base.fingerprint(), ruled.fingerprint());
        assert_ne!(base.fingerprint(), tuned.fingerprint());
    }

    #[test]
    fn test_dump_then_up_to_date() {
        let temp = TempDir::new().unwrap();
        let sets = FileSets::from_entries(
            temp.path(),
            entries(&["a.txt", "b.txt", "c.txt"]),
            entries(&["t.txt"]),
            &FilterConfig::new(1.0),
            &ForceRules::default(),
        );
        assert!(!sets.is_up_to_date());

        sets.dump_filtered(&["c.txt".to_string(), "a.txt".to_string()]).unwrap();
        assert!(sets.is_up_to_date());

        let train: Vec<FileEntry> = store::read_jsonl(&temp.path().join(FILTERED_TRAIN_SET)).unwrap();
        let paths: Vec<_> = train.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "c.txt"]);

        let changed = FileSets::from_entries(
            temp.path(),
            entries(&["a.txt", "b.txt"]),
            entries(&["t.txt"]),
            &FilterConfig::new(1.0),
            &ForceRules::default(),
        );
        assert!(!changed.is_up_to_date());
    }
}

//! Run-wide progress and summary statistics.
//!
//! [`RunState`] is the document an external monitor polls. The
//! [`StatsReporter`] owns it and rewrites the file on every mutation.

use crate::error::{FilterError, Result};
use crate::store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const RUN_STATE_FILE: &str = "filter_status.json";

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Running,
    Interrupted,
    Failed,
    Finished,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Starting => "starting",
            RunStatus::Running => "running",
            RunStatus::Interrupted => "interrupted",
            RunStatus::Failed => "failed",
            RunStatus::Finished => "finished",
        }
    }

    /// Check if the run is over (interrupted, failed or finished)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Interrupted | RunStatus::Failed | RunStatus::Finished
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    #[serde(default)]
    pub error_message: String,
    /// Name of the phase the step counters belong to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub total_steps: u64,
    pub completed_steps: u64,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    fn starting() -> Self {
        Self {
            status: RunStatus::Starting,
            error_message: String::new(),
            phase: None,
            total_steps: 0,
            completed_steps: 0,
            stats: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Read a persisted run state, as a monitor would.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        store::read_json(path)
    }

    /// Completed fraction of the current phase, 0.0 when it has no steps.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.completed_steps as f64 / self.total_steps as f64
        }
    }
}

/// Mark the run at `path` as interrupted without going through its
/// [`StatsReporter`], for a process that is about to exit in place.
///
/// A run already in a terminal state is left untouched.
pub fn record_interrupted(path: &Path, message: &str) -> Result<()> {
    let mut state = RunState::load(path)?.unwrap_or_else(RunState::starting);
    if state.status.is_terminal() {
        debug!("Run already {}, not marking interrupted", state.status);
        return Ok(());
    }
    state.status = RunStatus::Interrupted;
    state.error_message = message.to_string();
    state.updated_at = Utc::now();
    store::write_json(path, &state)
}

/// Owner of the [`RunState`] for one process.
#[derive(Debug)]
pub struct StatsReporter {
    path: PathBuf,
    state: RunState,
}

impl StatsReporter {
    /// Create a reporter in the `Starting` state. Nothing is written until the
    /// first mutation.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            state: RunState::starting(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn set_status(&mut self, status: RunStatus, error_message: Option<&str>) -> Result<()> {
        self.state.status = status;
        self.state.error_message = error_message.unwrap_or_default().to_string();
        debug!("Run status -> {}", status);
        self.persist()
    }

    /// Insert or overwrite a summary value. Non-finite values are dropped,
    /// JSON has no representation for them.
    pub fn add_stat(&mut self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            warn!("Dropping non-finite stat {} = {}", name, value);
            return Ok(());
        }
        self.state.stats.insert(name.to_string(), value);
        self.persist()
    }

    /// Start a bounded phase of `total_steps` units of work.
    pub fn begin(&mut self, phase: &str, total_steps: u64) -> Result<StepTracker<'_>> {
        self.state.phase = Some(phase.to_string());
        self.state.total_steps = total_steps;
        self.state.completed_steps = 0;
        self.persist()?;
        Ok(StepTracker { reporter: self })
    }

    fn persist(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        store::write_json(&self.path, &self.state)
    }
}

/// Step counter for one phase, see [`StatsReporter::begin`].
pub struct StepTracker<'a> {
    reporter: &'a mut StatsReporter,
}

impl StepTracker<'_> {
    pub fn step(&mut self) -> Result<()> {
        let state = &mut self.reporter.state;
        if state.completed_steps >= state.total_steps {
            return Err(FilterError::StepOverflow {
                phase: state.phase.clone().unwrap_or_default(),
                total: state.total_steps,
            });
        }
        state.completed_steps += 1;
        self.reporter.persist()
    }
}

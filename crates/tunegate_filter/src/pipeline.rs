//! Pipeline driver: force filter, loss filter, dump.
//!
//! The driver owns the [`StatsReporter`] for the run and maps every way a run
//! can end onto an [`Outcome`], and from there onto a process exit code the
//! sequencer understands.

use crate::cancel::CancellationToken;
use crate::config::{FilterConfig, ForceRules};
use crate::error::{FilterError, Result};
use crate::file_sets::FileSets;
use crate::force_filter::{self, ForceFilterSummary};
use crate::loss_filter::{self, LossFilterSummary};
use crate::scorer::LossScorer;
use crate::stats::{RunStatus, StatsReporter, RUN_STATE_FILE};
use crate::status::{FileStatusRegistry, StatusCounts, FILES_STATUS_FILE};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Exit code for a run stopped by a signal or cancellation.
pub const EXIT_INTERRUPTED: u8 = 99;
/// Exit code for a run that failed unexpectedly.
pub const EXIT_FAILED: u8 = 1;

pub const CONFIG_FILE: &str = "filter_config.toml";
pub const RULES_FILE: &str = "filetypes.json";

/// Where a run reads and writes its files.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub rules_path: PathBuf,
}

impl PipelineOptions {
    /// Config and rules next to the data.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            config_path: data_dir.join(CONFIG_FILE),
            rules_path: data_dir.join(RULES_FILE),
        }
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.data_dir.join(RUN_STATE_FILE)
    }

    pub fn files_status_path(&self) -> PathBuf {
        self.data_dir.join(FILES_STATUS_FILE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub force: ForceFilterSummary,
    pub loss: LossFilterSummary,
    pub counts: StatusCounts,
    pub test_files: usize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Filtered output already matches the inputs; nothing was done.
    UpToDate,
    Finished(RunSummary),
    Interrupted(String),
    Failed(String),
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::UpToDate | Outcome::Finished(_) => 0,
            Outcome::Interrupted(_) => EXIT_INTERRUPTED,
            Outcome::Failed(_) => EXIT_FAILED,
        }
    }
}

pub struct Pipeline {
    options: PipelineOptions,
    cancel: CancellationToken,
    threshold: Option<f64>,
}

impl Pipeline {
    pub fn new(options: PipelineOptions, cancel: CancellationToken) -> Self {
        Self {
            options,
            cancel,
            threshold: None,
        }
    }

    /// Run the filter. `load_scorer` is only called when there is work to do.
    pub fn run<S, F>(&mut self, load_scorer: F) -> Outcome
    where
        S: LossScorer,
        F: FnOnce(&FilterConfig) -> Result<S>,
    {
        let mut reporter = StatsReporter::new(&self.options.run_state_path());

        let outcome = match self.execute(&mut reporter, load_scorer) {
            Ok(None) => Outcome::UpToDate,
            Ok(Some(summary)) => Outcome::Finished(summary),
            Err(e) if e.is_interrupted() || self.cancel.is_cancelled() => {
                // Errors after cancellation are fallout of the interrupt
                // (e.g. a scorer killed by the same Ctrl+C).
                let message = if e.is_interrupted() {
                    e.to_string()
                } else {
                    format!("interrupted ({})", e)
                };
                if let Err(persist) = reporter.set_status(RunStatus::Interrupted, Some(&message)) {
                    error!("Failed to record interrupted status: {}", persist);
                }
                Outcome::Interrupted(message)
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(persist) = reporter.set_status(RunStatus::Failed, Some(&message)) {
                    error!("Failed to record failed status: {}", persist);
                }
                Outcome::Failed(message)
            }
        };

        self.log_outcome(&outcome);
        outcome
    }

    fn execute<S, F>(&mut self, reporter: &mut StatsReporter, load_scorer: F) -> Result<Option<RunSummary>>
    where
        S: LossScorer,
        F: FnOnce(&FilterConfig) -> Result<S>,
    {
        info!("Loading finetune configs...");
        let config = FilterConfig::load(&self.options.config_path)?;
        let rules = ForceRules::load(&self.options.rules_path)?;
        let (include, exclude) = rules.compile()?;
        self.threshold = Some(config.filter_loss_threshold);

        info!("Loading file sets...");
        let file_sets = FileSets::load(&self.options.data_dir, &config, &rules)?;
        if file_sets.is_up_to_date() {
            info!("Train set filtering: nothing changed since last time, quit");
            return Ok(None);
        }

        info!(
            "This filter calculates the loss for each file and filters out files with loss \
             larger than {:.3}. Those files likely don't have meaningful content to train on",
            config.filter_loss_threshold
        );
        reporter.set_status(RunStatus::Starting, None)?;

        info!("Loading files statuses...");
        let mut registry = FileStatusRegistry::load(
            &self.options.files_status_path(),
            file_sets.fingerprint(),
            &file_sets.train_files(),
            &file_sets.test_files(),
        )?;

        info!("Loading model...");
        let mut scorer = load_scorer(&config)?;
        self.check_cancelled("interrupted while loading the model")?;
        reporter.set_status(RunStatus::Running, None)?;

        info!("Running force include/exclude filter...");
        let force = force_filter::apply(&mut registry, &include, &exclude, &self.cancel)?;

        info!("Running loss based filter...");
        let loss = loss_filter::apply(
            &mut scorer,
            &mut registry,
            reporter,
            config.filter_loss_threshold,
            &self.cancel,
        )?;
        self.check_cancelled("interrupted before dumping filtered results")?;

        info!("Dumping filtered results...");
        file_sets.dump_filtered(&registry.accepted_train_files())?;

        let counts = registry.counts();
        if counts.unclassified > 0 {
            // Every train file goes through one of the two stages.
            warn!("{} train files left unclassified", counts.unclassified);
        }
        reporter.add_stat("train_files_accepted", counts.accepted as f64)?;
        reporter.add_stat("train_files_rejected", counts.rejected as f64)?;
        reporter.add_stat("test_files", file_sets.test_files().len() as f64)?;
        reporter.set_status(RunStatus::Finished, None)?;

        Ok(Some(RunSummary {
            force,
            loss,
            counts,
            test_files: file_sets.test_files().len(),
        }))
    }

    fn check_cancelled(&self, message: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(FilterError::Interrupted(message.to_string()))
        } else {
            Ok(())
        }
    }

    fn log_outcome(&self, outcome: &Outcome) {
        match outcome {
            Outcome::UpToDate => {}
            Outcome::Finished(summary) => {
                info!(
                    "Filtering finished: {} train files accepted, {} rejected, {} test files",
                    summary.counts.accepted, summary.counts.rejected, summary.test_files
                );
                if let Some(avg) = summary.loss.avg_loss {
                    info!("Average loss of accepted files: {:.3}", avg);
                }
            }
            Outcome::Interrupted(message) => warn!("Filtering interrupted: {}", message),
            Outcome::Failed(message) => error!("Finetune filter failed: {}", message),
        }
        if let (Some(threshold), true) = (self.threshold, *outcome != Outcome::UpToDate) {
            info!(
                "Files with a mean loss above filter_loss_threshold = {:.3} are rejected; \
                 raise it to keep more files, lower it to be stricter",
                threshold
            );
        }
    }
}

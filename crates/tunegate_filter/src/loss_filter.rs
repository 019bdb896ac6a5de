//! Loss threshold stage.
//!
//! Lower mean loss means the model finds the file predictable, so it is
//! kept. Files above the threshold are likely noise, boilerplate or content
//! unlike the rest of the corpus.

use crate::cancel::CancellationToken;
use crate::error::{FilterError, Result};
use crate::scorer::{BatchPolicy, LossScorer};
use crate::stats::StatsReporter;
use crate::status::{FileStatus, FileStatusRegistry};
use tracing::{info, warn};

pub const PHASE: &str = "loss_filter";
pub const AVG_LOSS_STAT: &str = "avg_loss";
pub const DEGENERATE_REASON: &str = "file too small or degenerate to score";

/// Outcome of scoring one file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileScore {
    /// Mean of the file's finite losses
    Loss(f64),
    /// The file could not be scored; the reason goes into the registry
    Failed(String),
}

/// Threshold decision for one scored file.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDecision {
    pub threshold: f64,
    pub measured_loss: f64,
    pub decision: FileStatus,
    pub reason: String,
}

/// Accept at or below the threshold, reject strictly above it.
pub fn decide(measured_loss: f64, threshold: f64) -> FilterDecision {
    let decision = if measured_loss > threshold {
        FileStatus::Rejected
    } else {
        FileStatus::Accepted
    };
    FilterDecision {
        threshold,
        measured_loss,
        decision,
        reason: format!("loss {:.3}", measured_loss),
    }
}

/// Arithmetic mean of the finite values, `None` when there are none.
pub fn mean_finite(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        None
    } else {
        Some(finite.iter().sum::<f64>() / finite.len() as f64)
    }
}

/// Score one file with a single-file batch stream.
///
/// Per-file problems come back as [`FileScore::Failed`]; only a scorer that
/// can no longer serve any file is an `Err`.
pub fn score_file<S: LossScorer + ?Sized>(scorer: &mut S, path: &str) -> Result<FileScore> {
    match scorer.score(path, BatchPolicy::SINGLE_FILE) {
        Ok(losses) => Ok(match mean_finite(&losses) {
            Some(mean) => FileScore::Loss(mean),
            None => FileScore::Failed(DEGENERATE_REASON.to_string()),
        }),
        Err(e) if e.is_fatal() => Err(FilterError::Scorer(e.to_string())),
        Err(e) => Ok(FileScore::Failed(e.to_string())),
    }
}

fn interrupted_during(path: &str, cause: &str) -> FilterError {
    FilterError::Interrupted(format!("interrupted while scoring {} ({})", path, cause))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossFilterSummary {
    pub accepted: usize,
    pub rejected: usize,
    /// Rejected because scoring failed
    pub failed: usize,
    /// Mean loss of all files accepted by scoring, earlier interrupted runs included
    pub avg_loss: Option<f64>,
}

/// Score and classify every unclassified train file, one at a time.
pub fn apply<S: LossScorer + ?Sized>(
    scorer: &mut S,
    registry: &mut FileStatusRegistry,
    reporter: &mut StatsReporter,
    threshold: f64,
    cancel: &CancellationToken,
) -> Result<LossFilterSummary> {
    let files = registry.unclassified_train_files();
    let total = files.len();
    let mut summary = LossFilterSummary::default();

    info!("Scoring {} files against loss threshold {:.3}", total, threshold);
    {
        let mut tracker = reporter.begin(PHASE, total as u64)?;
        for (done, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FilterError::Interrupted(format!(
                    "interrupted after scoring {} of {} files",
                    done, total
                )));
            }

            let score = match score_file(scorer, path) {
                // The signal may have reached the scorer too. Once cancelled,
                // only a clean loss counts as a verdict on the file.
                Err(e) if cancel.is_cancelled() => {
                    return Err(interrupted_during(path, &e.to_string()))
                }
                Ok(FileScore::Failed(reason)) if cancel.is_cancelled() => {
                    return Err(interrupted_during(path, &reason))
                }
                other => other?,
            };

            match score {
                FileScore::Failed(reason) => {
                    warn!("Cannot score {}: {}", path, reason);
                    registry.reject(path, &reason)?;
                    summary.failed += 1;
                    summary.rejected += 1;
                }
                FileScore::Loss(loss) => {
                    let decision = decide(loss, threshold);
                    registry.classify_scored(path, decision.decision, loss, &decision.reason)?;
                    if decision.decision == FileStatus::Accepted {
                        summary.accepted += 1;
                    } else {
                        summary.rejected += 1;
                    }
                }
            }

            tracker.step()?;
        }
    }

    summary.avg_loss = registry.accepted_mean_loss();
    match summary.avg_loss {
        Some(avg) => reporter.add_stat(AVG_LOSS_STAT, avg)?,
        None => warn!("No file passed the loss filter, {} is not reported", AVG_LOSS_STAT),
    }

    info!(
        "Loss filter: {} accepted, {} rejected ({} could not be scored)",
        summary.accepted, summary.rejected, summary.failed
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ScoreError;
    use crate::stats::{RunState, RUN_STATE_FILE};
    use crate::status::FILES_STATUS_FILE;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeScorer {
        losses: HashMap<String, Vec<f64>>,
        errors: HashMap<String, ScoreError>,
        calls: Vec<String>,
        cancel_on: Option<(String, CancellationToken)>,
    }

    impl FakeScorer {
        fn with(mut self, path: &str, losses: &[f64]) -> Self {
            self.losses.insert(path.to_string(), losses.to_vec());
            self
        }

        fn failing(mut self, path: &str, error: ScoreError) -> Self {
            self.errors.insert(path.to_string(), error);
            self
        }

        /// Cancel `token` when `path` is scored, before answering.
        fn cancelling(mut self, path: &str, token: &CancellationToken) -> Self {
            self.cancel_on = Some((path.to_string(), token.clone()));
            self
        }
    }

    impl LossScorer for FakeScorer {
        fn score(&mut self, path: &str, policy: BatchPolicy) -> std::result::Result<Vec<f64>, ScoreError> {
            assert_eq!(policy, BatchPolicy::SINGLE_FILE);
            self.calls.push(path.to_string());
            if let Some((trigger, token)) = &self.cancel_on {
                if trigger == path {
                    token.cancel();
                }
            }
            if let Some(err) = self.errors.remove(path) {
                return Err(err);
            }
            Ok(self.losses.get(path).cloned().unwrap_or_default())
        }
    }

    struct Fixture {
        _temp: TempDir,
        registry: FileStatusRegistry,
        reporter: StatsReporter,
        state_path: std::path::PathBuf,
    }

    fn fixture(files: &[&str]) -> Fixture {
        let temp = TempDir::new().unwrap();
        let files: Vec<String> = files.iter().map(|s| s.to_string()).collect();
        let registry =
            FileStatusRegistry::load(&temp.path().join(FILES_STATUS_FILE), "fp", &files, &[])
                .unwrap();
        let state_path = temp.path().join(RUN_STATE_FILE);
        let reporter = StatsReporter::new(&state_path);
        Fixture {
            _temp: temp,
            registry,
            reporter,
            state_path,
        }
    }

    #[test]
    fn test_decide_boundary_accepts() {
        assert_eq!(decide(1.0, 1.0).decision, FileStatus::Accepted);
        assert_eq!(decide(1.0001, 1.0).decision, FileStatus::Rejected);
        assert_eq!(decide(0.2, 1.0).reason, "loss 0.200");
    }

    #[test]
    fn test_mean_finite_ignores_nan_and_inf() {
        assert_eq!(mean_finite(&[1.0, f64::NAN, 3.0, f64::INFINITY]), Some(2.0));
        assert_eq!(mean_finite(&[f64::NAN, f64::NEG_INFINITY]), None);
        assert_eq!(mean_finite(&[]), None);
    }

    #[test]
    fn test_threshold_split_and_avg_loss() {
        let mut fx = fixture(&["a.txt", "b.txt", "c.txt"]);
        let mut scorer = FakeScorer::default()
            .with("a.txt", &[0.1, 0.3])
            .with("b.txt", &[5.0])
            .with("c.txt", &[0.6, f64::NAN]);

        let summary = apply(
            &mut scorer,
            &mut fx.registry,
            &mut fx.reporter,
            1.0,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(fx.registry.record("a.txt").unwrap().reason, "loss 0.200");
        assert_eq!(fx.registry.record("b.txt").unwrap().reason, "loss 5.000");
        assert_eq!(fx.registry.record("c.txt").unwrap().reason, "loss 0.600");
        let avg = summary.avg_loss.unwrap();
        assert!((avg - 0.4).abs() < 1e-12);

        let state = RunState::load(&fx.state_path).unwrap().unwrap();
        assert_eq!(state.completed_steps, 3);
        assert_eq!(state.total_steps, 3);
        assert!((state.stats[AVG_LOSS_STAT] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_failures_rejected_and_counted_as_steps() {
        let mut fx = fixture(&["empty.txt", "nan.txt", "broken.txt", "ok.txt"]);
        let mut scorer = FakeScorer::default()
            .with("nan.txt", &[f64::NAN, f64::NAN])
            .failing("broken.txt", ScoreError::File("invalid utf-8".into()))
            .with("ok.txt", &[0.5]);

        let summary = apply(
            &mut scorer,
            &mut fx.registry,
            &mut fx.reporter,
            1.0,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.accepted, 1);
        assert_eq!(fx.registry.record("empty.txt").unwrap().reason, DEGENERATE_REASON);
        assert_eq!(fx.registry.record("nan.txt").unwrap().status, FileStatus::Rejected);
        assert_eq!(fx.registry.record("broken.txt").unwrap().reason, "invalid utf-8");
        assert_eq!(fx.reporter.state().completed_steps, 4);
    }

    #[test]
    fn test_no_accepted_files_omits_avg_loss() {
        let mut fx = fixture(&["b.txt"]);
        let mut scorer = FakeScorer::default().with("b.txt", &[5.0]);

        let summary = apply(
            &mut scorer,
            &mut fx.registry,
            &mut fx.reporter,
            1.0,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(summary.avg_loss, None);
        assert!(!fx.reporter.state().stats.contains_key(AVG_LOSS_STAT));
    }

    #[test]
    fn test_fatal_scorer_error_aborts() {
        let mut fx = fixture(&["a.txt", "b.txt"]);
        let mut scorer = FakeScorer::default()
            .failing("a.txt", ScoreError::Unavailable("pipe closed".into()));

        let err = apply(
            &mut scorer,
            &mut fx.registry,
            &mut fx.reporter,
            1.0,
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(err, FilterError::Scorer(_)));
        assert_eq!(scorer.calls, vec!["a.txt"]);
        assert_eq!(fx.registry.unclassified_train_files().len(), 2);
    }

    #[test]
    fn test_cancel_stops_before_next_file() {
        let mut fx = fixture(&["a.txt", "b.txt"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut scorer = FakeScorer::default().with("a.txt", &[0.1]);

        let err = apply(&mut scorer, &mut fx.registry, &mut fx.reporter, 1.0, &cancel)
            .unwrap_err();

        assert!(err.is_interrupted());
        assert!(scorer.calls.is_empty());
        assert_eq!(fx.reporter.state().completed_steps, 0);
    }

    #[test]
    fn test_scorer_lost_after_cancel_is_interrupt() {
        let mut fx = fixture(&["a.txt", "b.txt"]);
        let cancel = CancellationToken::new();
        let mut scorer = FakeScorer::default()
            .cancelling("a.txt", &cancel)
            .failing("a.txt", ScoreError::Unavailable("scorer closed its output".into()));

        let err = apply(&mut scorer, &mut fx.registry, &mut fx.reporter, 1.0, &cancel)
            .unwrap_err();

        assert!(err.is_interrupted());
        assert_eq!(fx.registry.unclassified_train_files(), vec!["a.txt", "b.txt"]);
        assert_eq!(fx.reporter.state().completed_steps, 0);
    }

    #[test]
    fn test_file_error_after_cancel_leaves_file_unclassified() {
        let mut fx = fixture(&["a.txt"]);
        let cancel = CancellationToken::new();
        let mut scorer = FakeScorer::default()
            .cancelling("a.txt", &cancel)
            .failing("a.txt", ScoreError::File("KeyboardInterrupt".into()));

        let err = apply(&mut scorer, &mut fx.registry, &mut fx.reporter, 1.0, &cancel)
            .unwrap_err();

        assert!(err.is_interrupted());
        assert_eq!(fx.registry.record("a.txt").unwrap().status, FileStatus::Unclassified);
    }

    #[test]
    fn test_loss_measured_before_cancel_is_kept() {
        let mut fx = fixture(&["a.txt", "b.txt"]);
        let cancel = CancellationToken::new();
        let mut scorer = FakeScorer::default()
            .with("a.txt", &[0.3])
            .cancelling("a.txt", &cancel);

        let err = apply(&mut scorer, &mut fx.registry, &mut fx.reporter, 1.0, &cancel)
            .unwrap_err();

        assert!(err.is_interrupted());
        let record = fx.registry.record("a.txt").unwrap();
        assert_eq!(record.status, FileStatus::Accepted);
        assert_eq!(record.loss, Some(0.3));
        assert_eq!(scorer.calls, vec!["a.txt"]);
    }
}

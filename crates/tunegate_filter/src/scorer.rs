//! Model scorer seam.
//!
//! The filter only needs "feed one file, get back a loss per processed unit".
//! [`LossScorer`] is that seam; [`CommandScorer`] drives a long-lived model
//! process over a line-delimited JSON protocol:
//!
//! ```text
//! scorer -> {"status": "ready"}                      once, after the model is loaded
//! filter -> {"path": "...", "batch_size": 1, "drop_last": false}
//! scorer -> {"losses": [0.91, 1.02, null]}           null = non-finite value
//!        |  {"error": "file too short"}
//! ```

use crate::error::{FilterError, Result};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How a file is cut into scoring batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub drop_last: bool,
}

impl BatchPolicy {
    /// One unit per batch, trailing partial batch kept.
    pub const SINGLE_FILE: BatchPolicy = BatchPolicy {
        batch_size: 1,
        drop_last: false,
    };
}

/// Error from scoring a single file.
#[derive(Error, Debug)]
pub enum ScoreError {
    /// The scorer could not score this file; other files are unaffected.
    #[error("{0}")]
    File(String),

    /// The scorer itself is gone or speaking garbage; nothing else can be scored.
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
}

impl ScoreError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScoreError::Unavailable(_))
    }
}

impl From<io::Error> for ScoreError {
    fn from(e: io::Error) -> Self {
        ScoreError::Unavailable(e.to_string())
    }
}

/// Produces one scalar loss per processed unit of a file.
///
/// Implementations are stateful and not shareable; the filter calls `score`
/// for one file at a time.
pub trait LossScorer {
    fn score(&mut self, path: &str, policy: BatchPolicy) -> std::result::Result<Vec<f64>, ScoreError>;
}

impl<S: LossScorer + ?Sized> LossScorer for Box<S> {
    fn score(&mut self, path: &str, policy: BatchPolicy) -> std::result::Result<Vec<f64>, ScoreError> {
        (**self).score(path, policy)
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    path: &'a str,
    batch_size: usize,
    drop_last: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScoreResponse {
    Losses { losses: Vec<Option<f64>> },
    Error { error: String },
}

#[derive(Deserialize)]
struct ReadyLine {
    status: String,
}

/// Scorer backed by an external model process.
pub struct CommandScorer {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl CommandScorer {
    /// Spawn the scorer and wait until it reports the model as loaded.
    ///
    /// Every failure here is a model-load failure.
    pub fn spawn(command: &[String], working_dir: &Path) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            FilterError::Config("scorer_command is empty; nothing to load the model with".into())
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        // Own process group: a terminal Ctrl+C interrupts the filter, which
        // then stops the scorer itself between files.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| FilterError::ModelLoad(format!("failed to spawn '{}': {}", program, e)))?;

        info!("Spawned scorer (pid={}): {}", child.id(), command.join(" "));

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, BufReader::new(stdout)),
            _ => {
                cleanup_process(&mut child);
                return Err(FilterError::ModelLoad("scorer pipes unavailable".into()));
            }
        };
        let mut scorer = Self {
            child,
            stdin,
            stdout,
        };

        match scorer.read_line() {
            Ok(Some(line)) => match serde_json::from_str::<ReadyLine>(&line) {
                Ok(ready) if ready.status == "ready" => {
                    info!("Scorer ready");
                    Ok(scorer)
                }
                _ => Err(FilterError::ModelLoad(format!(
                    "expected ready line from scorer, got: {}",
                    line.trim()
                ))),
            },
            Ok(None) => Err(FilterError::ModelLoad(
                "scorer exited before loading the model".into(),
            )),
            Err(e) => Err(FilterError::ModelLoad(e.to_string())),
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

impl LossScorer for CommandScorer {
    fn score(&mut self, path: &str, policy: BatchPolicy) -> std::result::Result<Vec<f64>, ScoreError> {
        let request = serde_json::to_string(&ScoreRequest {
            path,
            batch_size: policy.batch_size,
            drop_last: policy.drop_last,
        })
        .map_err(|e| ScoreError::File(e.to_string()))?;
        writeln!(self.stdin, "{}", request)?;
        self.stdin.flush()?;

        let line = self
            .read_line()?
            .ok_or_else(|| ScoreError::Unavailable("scorer closed its output".into()))?;
        let response: ScoreResponse = serde_json::from_str(&line).map_err(|e| {
            ScoreError::Unavailable(format!("unreadable response '{}': {}", line.trim(), e))
        })?;

        match response {
            ScoreResponse::Losses { losses } => {
                debug!("Scored {}: {} units", path, losses.len());
                Ok(losses.into_iter().map(|l| l.unwrap_or(f64::NAN)).collect())
            }
            ScoreResponse::Error { error } => Err(ScoreError::File(error)),
        }
    }
}

impl Drop for CommandScorer {
    fn drop(&mut self) {
        if let Ok(Some(status)) = self.child.try_wait() {
            warn!("Scorer already exited with {}", status);
            return;
        }
        cleanup_process(&mut self.child);
    }
}

fn cleanup_process(process: &mut Child) {
    let _ = process.kill();
    let _ = process.wait();
}

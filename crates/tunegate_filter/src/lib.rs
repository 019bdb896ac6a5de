//! Tunegate filter - selects the files of a fine-tuning corpus worth training on
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │  File sets  │     │   Force     │     │    Loss     │     │ Filtered sets │
//! │ (train/test)│────▶│  filter     │────▶│   filter    │────▶│  + metadata   │
//! │             │     │ (globs)     │     │ (scorer)    │     │               │
//! └─────────────┘     └─────────────┘     └─────────────┘     └───────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     files_status.json   filter_status.json
//! ```
//!
//! # Core Concepts
//!
//! - **FileStatusRegistry**: per-file status and reason, persisted after every change
//! - **StatsReporter**: run status, step counters and summary stats for monitors
//! - **LossScorer**: the model seam; one loss per processed unit of a file
//! - **Pipeline**: sequencing, cancellation and the exit-code contract

pub mod cancel;
pub mod config;
pub mod error;
pub mod file_sets;
pub mod force_filter;
pub mod loss_filter;
pub mod patterns;
pub mod pipeline;
pub mod scorer;
pub mod stats;
pub mod status;
mod store;

// Re-exports for convenience
pub use cancel::CancellationToken;
pub use config::{FilterConfig, ForceRules};
pub use error::{FilterError, Result};
pub use file_sets::{FileEntry, FileSets};
pub use loss_filter::{FileScore, FilterDecision, LossFilterSummary};
pub use patterns::PathMatcher;
pub use pipeline::{Outcome, Pipeline, PipelineOptions, RunSummary, EXIT_FAILED, EXIT_INTERRUPTED};
pub use scorer::{BatchPolicy, CommandScorer, LossScorer, ScoreError};
pub use stats::{RunState, RunStatus, StatsReporter};
pub use status::{FileRecord, FileStatus, FileStatusRegistry, StatusCounts};

//! Force include/exclude stage.

use crate::cancel::CancellationToken;
use crate::error::{FilterError, Result};
use crate::patterns::PathMatcher;
use crate::status::FileStatusRegistry;
use tracing::info;

pub const FORCE_INCLUDED: &str = "FORCE_INCLUDED";
pub const FORCE_REJECTED: &str = "FORCE_REJECTED";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForceFilterSummary {
    pub included: usize,
    pub excluded: usize,
}

/// Classify unclassified train files by rule. Include is checked first, so a
/// file matching both rules is accepted. Files matching neither stay
/// unclassified for the loss stage.
pub fn apply(
    registry: &mut FileStatusRegistry,
    include: &PathMatcher,
    exclude: &PathMatcher,
    cancel: &CancellationToken,
) -> Result<ForceFilterSummary> {
    let mut summary = ForceFilterSummary::default();
    if include.is_empty() && exclude.is_empty() {
        info!("No force include/exclude rules");
        return Ok(summary);
    }

    for path in registry.unclassified_train_files() {
        if cancel.is_cancelled() {
            return Err(FilterError::Interrupted(
                "interrupted during force include/exclude filter".into(),
            ));
        }
        if include.is_match(&path) {
            registry.accept(&path, FORCE_INCLUDED)?;
            summary.included += 1;
        } else if exclude.is_match(&path) {
            registry.reject(&path, FORCE_REJECTED)?;
            summary.excluded += 1;
        }
    }

    info!(
        "Force filter: {} included, {} excluded",
        summary.included, summary.excluded
    );
    Ok(summary)
}

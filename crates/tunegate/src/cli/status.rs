//! `tunegate status`: what a monitor would see in filter_status.json.

use super::output::{format_time_ago, progress_bar};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tunegate_filter::stats::RUN_STATE_FILE;
use tunegate_filter::{RunState, RunStatus};

pub fn run(data_dir: &Path, json: bool) -> Result<()> {
    let path = data_dir.join(RUN_STATE_FILE);
    let state = RunState::load(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let Some(state) = state else {
        if json {
            println!("null");
        } else {
            println!("No filter run recorded in {}", data_dir.display());
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print!("{}", render(&state));
    }
    Ok(())
}

fn render(state: &RunState) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Status:   {} (updated {})\n",
        state.status,
        format_time_ago(state.updated_at, Utc::now())
    ));
    if let Some(phase) = &state.phase {
        out.push_str(&format!(
            "Phase:    {} {} {}/{}\n",
            phase,
            progress_bar(state.progress(), 20),
            state.completed_steps,
            state.total_steps
        ));
    }
    if matches!(state.status, RunStatus::Failed | RunStatus::Interrupted)
        && !state.error_message.is_empty()
    {
        out.push_str(&format!("Error:    {}\n", state.error_message));
    }
    if !state.stats.is_empty() {
        out.push_str("Stats:\n");
        for (name, value) in &state.stats {
            if value.fract() == 0.0 {
                out.push_str(&format!("  {:<24} {}\n", name, value));
            } else {
                out.push_str(&format!("  {:<24} {:.3}\n", name, value));
            }
        }
    }
    out
}

//! `tunegate run`: the filter itself.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tunegate_filter::stats::record_interrupted;
use tunegate_filter::{
    CancellationToken, CommandScorer, FilterConfig, FilterError, Pipeline, PipelineOptions,
    EXIT_INTERRUPTED,
};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Filter config (default: <data-dir>/filter_config.toml)
    #[arg(long, env = "TUNEGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Force include/exclude rules (default: <data-dir>/filetypes.json)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Scorer command line, overrides `scorer_command` from the config
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    pub scorer: Vec<String>,
}

/// Run the pipeline and return the process exit code.
pub fn run(data_dir: &Path, args: RunArgs) -> Result<u8> {
    let mut options = PipelineOptions::in_dir(data_dir);
    if let Some(config) = args.config {
        options.config_path = config;
    }
    if let Some(rules) = args.rules {
        options.rules_path = rules;
    }

    let cancel = CancellationToken::new();
    install_signal_handlers(&cancel, options.run_state_path())
        .context("Failed to install signal handlers")?;

    info!("Data directory: {}", data_dir.display());
    let scorer_override = args.scorer;
    let working_dir = data_dir.to_path_buf();
    let outcome = Pipeline::new(options, cancel).run(move |config: &FilterConfig| {
        let command = if scorer_override.is_empty() {
            &config.scorer_command
        } else {
            &scorer_override
        };
        if command.is_empty() {
            return Err(FilterError::Config(
                "no scorer configured: set scorer_command or pass --scorer".into(),
            ));
        }
        CommandScorer::spawn(command, &working_dir)
    });

    Ok(outcome.exit_code())
}

/// Signals only flip the cancellation token; the pipeline notices between
/// files. A second signal while a file is still being scored records the
/// interruption and exits at once.
fn install_signal_handlers(cancel: &CancellationToken, state_path: PathBuf) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGUSR1, SIGINT, SIGTERM])?;
        let token = cancel.clone();
        std::thread::spawn(move || {
            for sig in signals.forever() {
                if token.is_cancelled() {
                    exit_interrupted(&state_path, &format!("signal {}", sig));
                }
                info!("Received signal {}, interrupting after the current file", sig);
                token.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        let token = cancel.clone();
        ctrlc::set_handler(move || {
            if token.is_cancelled() {
                exit_interrupted(&state_path, "Ctrl+C");
            }
            info!("Received Ctrl+C, interrupting after the current file");
            token.cancel();
        })?;
    }

    Ok(())
}

fn exit_interrupted(state_path: &Path, source: &str) -> ! {
    let message = format!("{} received twice, stopped without finishing the current file", source);
    warn!("{}", message);
    if let Err(e) = record_interrupted(state_path, &message) {
        error!("Failed to record interrupted status: {}", e);
    }
    std::process::exit(i32::from(EXIT_INTERRUPTED));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_scorer_command_fails_run() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("unfiltered_train_set.jsonl"),
            "{\"path\":\"a.txt\"}\n",
        )
        .unwrap();
        FilterConfig::new(1.0)
            .save(&temp.path().join("filter_config.toml"))
            .unwrap();

        let code = run(temp.path(), RunArgs::default()).unwrap();

        assert_eq!(code, tunegate_filter::EXIT_FAILED);
        let state = tunegate_filter::RunState::load(&temp.path().join("filter_status.json"))
            .unwrap()
            .unwrap();
        assert!(state.error_message.contains("no scorer configured"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_shell_scorer() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("unfiltered_train_set.jsonl"),
            "{\"path\":\"good.txt\"}\n{\"path\":\"noise.txt\"}\n",
        )
        .unwrap();
        FilterConfig::new(1.0)
            .save(&temp.path().join("filter_config.toml"))
            .unwrap();
        let script = r#"
echo '{"status":"ready"}'
while read -r line; do
  case "$line" in
    *noise*) echo '{"losses":[4.0,6.0]}' ;;
    *) echo '{"losses":[0.25]}' ;;
  esac
done
"#;
        let args = RunArgs {
            scorer: vec!["sh".into(), "-c".into(), script.into()],
            ..RunArgs::default()
        };

        let code = run(temp.path(), args).unwrap();

        assert_eq!(code, 0);
        let filtered =
            std::fs::read_to_string(temp.path().join("train_set_filtered.jsonl")).unwrap();
        assert!(filtered.contains("good.txt"));
        assert!(!filtered.contains("noise.txt"));
    }
}

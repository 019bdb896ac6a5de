//! Tunegate - fine-tuning corpus filter
//!
//! Exit codes, consumed by the pipeline sequencer:
//! - 0: finished, or nothing changed since the last run
//! - 1: failed
//! - 99: interrupted (SIGUSR1, SIGINT, SIGTERM)

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tunegate_filter::FileStatus;
use tunegate_logging::{ConsoleLevel, LogConfig};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "tunegate", about = "Select the files of a fine-tuning corpus worth training on")]
struct Cli {
    /// Directory holding the file sets, config and filter state
    #[arg(long, global = true, env = "TUNEGATE_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors to stderr
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the force and loss filters (default)
    Run(cli::run::RunArgs),

    /// Show the state of the current or last run
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List per-file classification results
    Files {
        /// Only show files with this status (accepted, rejected, unclassified)
        #[arg(short, long)]
        status: Option<FileStatus>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let console = if cli.verbose {
        ConsoleLevel::Verbose
    } else if cli.quiet {
        ConsoleLevel::Quiet
    } else {
        ConsoleLevel::Normal
    };
    if let Err(err) = tunegate_logging::init_logging(LogConfig {
        app_name: "tunegate",
        console,
        log_dir: None,
    }) {
        eprintln!("Warning: file logging unavailable: {:#}", err);
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "tunegate=info,tunegate_filter=info".into()),
            )
            .try_init();
    }

    let result = match cli.command {
        None => cli::run::run(&cli.data_dir, cli::run::RunArgs::default()),
        Some(Commands::Run(args)) => cli::run::run(&cli.data_dir, args),
        Some(Commands::Status { json }) => cli::status::run(&cli.data_dir, json).map(|_| 0),
        Some(Commands::Files { status, json }) => {
            cli::files::run(&cli.data_dir, status, json).map(|_| 0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(tunegate_filter::EXIT_FAILED)
        }
    }
}

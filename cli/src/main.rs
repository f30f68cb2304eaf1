//! jobtrail: tamper-evident audit trails for job-posting runs.
//!
//! Writes events into a run's hash chain, seals runs, and verifies append
//! files. Results go to stdout as one canonically encoded JSON object; logs
//! go to stderr.
//!
//! Usage:
//!   jobtrail verify --run <RUN_ID_OR_PATH>
//!   jobtrail cross-check --run <RUN_ID>
//!   jobtrail log --run <RUN_ID> --step <STEP> [--status ok|error] [--details JSON]
//!   jobtrail seal --run <RUN_ID>
//!   jobtrail bootstrap --url <URL>
//!
//! Exit codes: 0 success / valid, 1 broken chain or failed command,
//! 2 target not found.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jobtrail_config::{LoggingConfig, TrailConfig};
use jobtrail_contracts::{error::TrailResult, event::EventStatus};

// ── CLI definition ───────────────────────────────────────────────────────────

/// jobtrail: hash-chained audit trails.
#[derive(Parser)]
#[command(
    name = "jobtrail",
    version,
    about = "Append-only, hash-chained audit trails for automation runs",
    long_about = "Records every step of a run in a SHA-256 hash chain, written to a\n\
                  per-run append file and a SQLite store, and verifies those chains."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "JOBTRAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Override `artifacts.base_dir`.
    #[arg(long, global = true)]
    artifacts_dir: Option<PathBuf>,

    /// Override `store.path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a run's append file and report the first break, if any.
    Verify {
        /// Run id, run directory, or path to an append file.
        #[arg(long)]
        run: String,
    },
    /// Compare a run's append file with its store rows.
    CrossCheck {
        #[arg(long)]
        run: String,
    },
    /// Append one event to a run's chain.
    Log {
        #[arg(long)]
        run: String,
        #[arg(long)]
        step: String,
        #[arg(long, default_value = "ok")]
        status: EventStatus,
        /// JSON object with the step's details.
        #[arg(long)]
        details: Option<String>,
        #[arg(long)]
        input_digest: Option<String>,
        #[arg(long)]
        output_digest: Option<String>,
        /// Artifact path; repeat for several.
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
    },
    /// Append the terminal seal event to a run.
    Seal {
        #[arg(long)]
        run: String,
    },
    /// Create a run, record a placeholder artifact, then finish and seal it.
    Bootstrap {
        #[arg(long)]
        url: String,
    },
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("jobtrail: {e}");
            return ExitCode::from(commands::EXIT_FAILURE);
        }
    };
    init_logging(&config.logging);

    ExitCode::from(commands::run(cli.command, &config))
}

/// The configuration file (if any) with command-line overrides applied.
fn load_config(cli: &Cli) -> TrailResult<TrailConfig> {
    let mut config = match &cli.config {
        Some(path) => TrailConfig::from_file(path)?,
        None => TrailConfig::default(),
    };
    if let Some(dir) = &cli.artifacts_dir {
        config.artifacts.base_dir = dir.clone();
    }
    if let Some(db) = &cli.db {
        config.store.path = db.clone();
    }
    Ok(config)
}

/// Structured logging to stderr. `RUST_LOG` wins over the configured filter.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

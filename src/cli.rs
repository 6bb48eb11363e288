//! Command-line interface definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use forkpool::PoolMode;
use forkpool::logging::LogFormat;
use forkpool::worker::BuiltinHandler;

/// Run JSON jobs in isolated worker processes.
#[derive(Parser, Debug)]
#[command(name = "forkpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format (pretty, compact, json).
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one job per input line and print one result line per job.
    Run(RunArgs),

    /// Serve a built-in handler over stdin/stdout (used by pool workers).
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pool strategy.
    #[arg(long, env = "FORKPOOL_MODE", default_value_t = PoolMode::Persistent)]
    pub mode: PoolMode,

    /// Number of workers (persistent mode).
    #[arg(short, long, env = "FORKPOOL_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Maximum simultaneous workers (ephemeral mode; unbounded by default).
    #[arg(long, env = "FORKPOOL_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Per-job timeout in milliseconds.
    #[arg(long, env = "FORKPOOL_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Restarts allowed per minute before the pool shrinks (persistent mode).
    #[arg(long, env = "FORKPOOL_MAX_RESTARTS", default_value_t = 5)]
    pub max_restarts: u32,

    /// Handler the workers run.
    #[arg(long, value_enum, default_value_t = BuiltinHandler::Double)]
    pub handler: BuiltinHandler,

    /// JSON value handed to every worker at startup.
    #[arg(long)]
    pub worker_data: Option<String>,

    /// Read payloads from a file instead of stdin.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Print pool statistics to stderr when done.
    #[arg(long)]
    pub stats: bool,
}

/// Arguments for the hidden worker command.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Handler to serve.
    #[arg(long, value_enum)]
    pub handler: BuiltinHandler,
}

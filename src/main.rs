//! forkpool - run jobs in isolated worker processes

mod cli;

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use owo_colors::{OwoColorize, Stream::Stderr};
use serde_json::Value;

use cli::{Cli, Commands, RunArgs};
use forkpool::logging::{self, LogConfig};
use forkpool::protocol::Response;
use forkpool::unit::ProcessBackend;
use forkpool::{PoolConfig, PoolMode, RestartPolicy, SubmitOptions, WorkerPool};

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let mut log_config = LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides();
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    if matches!(cli.command, Commands::Worker(_)) {
        // Workers share the parent's stderr; only the parent writes the log file.
        log_config.file_path = None;
    } else {
        log_config = log_config.with_thread_names(true);
    }
    logging::init(log_config);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Worker(args) => forkpool::worker::run_worker(args.handler),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Read payload lines, run them through a pool, print results in input order.
fn cmd_run(args: &RunArgs) -> Result<()> {
    let payloads = read_payloads(args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let pool = WorkerPool::new(pool_config(args)?).context("Failed to start worker pool")?;
        tracing::info!(mode = %args.mode, jobs = payloads.len(), "Running jobs");

        let options = SubmitOptions {
            timeout: args.timeout_ms.map(Duration::from_millis),
            cancellation: None,
        };
        let handles: Vec<_> = payloads
            .into_iter()
            .map(|payload| pool.submit(payload, options.clone()))
            .collect();

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for handle in handles {
            let response = match handle.await {
                Ok(result) => Response::ok(result),
                Err(e) => Response::error(e.to_serialized()),
            };
            out.write_all(response.to_line()?.as_bytes())?;
        }
        out.flush()?;

        if args.stats {
            let stats = pool.stats().await?;
            eprintln!("{}", serde_json::to_string_pretty(&stats)?);
        }

        pool.shutdown("run complete").await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn pool_config(args: &RunArgs) -> Result<PoolConfig> {
    let handler = args
        .handler
        .to_possible_value()
        .context("Handler has no command-line name")?;
    let backend = ProcessBackend::current_exe()?.args(["worker", "--handler", handler.get_name()]);

    let mut config = match args.mode {
        PoolMode::Persistent => PoolConfig::persistent(backend, args.workers)
            .with_restart(RestartPolicy::new(args.max_restarts, Duration::from_secs(60))),
        PoolMode::Ephemeral => PoolConfig::ephemeral(backend),
    };
    if let Some(max) = args.max_concurrency {
        config = config.with_max_concurrency(max);
    }
    if let Some(raw) = &args.worker_data {
        let data: Value = serde_json::from_str(raw).context("Invalid --worker-data JSON")?;
        config = config.with_worker_data(data);
    }
    Ok(config)
}

fn read_payloads(args: &RunArgs) -> Result<Vec<Value>> {
    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(std::io::stdin().lock()),
    };

    let mut payloads = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let payload = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON payload on line {}", index + 1))?;
        payloads.push(payload);
    }
    Ok(payloads)
}

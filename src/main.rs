//! pgbackup - PostgreSQL schema backup lifecycle
//!
//! Dumps, compresses, checksums and packages each configured schema, files
//! the archives into retention tiers, copies them off-host and prunes old ones.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgbackup::{
    archive,
    config::{BackupConfig, BackupJob},
    logging,
    orchestrator::{Orchestrator, EXIT_ABORTED, EXIT_PARTIAL_FAILURE, EXIT_SUCCESS},
    services::{find_executable, Services, Sha256Checksummer},
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pgbackup")]
#[command(version)]
#[command(about = "PostgreSQL schema backups with tiered retention")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PGBACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full backup lifecycle (default)
    Run {
        /// Write the run result as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Check that every required external tool is installed
    Check,

    /// Apply retention to the tier directories only
    Prune,

    /// Verify the checksum of an archive
    Verify {
        /// Archive file (`{schema}_{YYYYMMDD_HHMMSS}.tar`)
        archive: PathBuf,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = BackupConfig::load(cli.config.as_deref())?;
    logging::init(cli.verbose, &config.logging)?;

    let code = match cli.command.unwrap_or(Commands::Run { report: None }) {
        Commands::Run { report } => run_backup(config, report.as_deref()).await?,
        Commands::Check => run_check(config)?,
        Commands::Prune => run_prune(config).await?,
        Commands::Verify { archive } => run_verify(&archive).await,
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
            EXIT_SUCCESS
        }
    };

    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn job_or_abort(config: BackupConfig) -> Option<BackupJob> {
    match config.into_job() {
        Ok(job) => Some(job),
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            None
        }
    }
}

fn orchestrator(job: BackupJob) -> Orchestrator {
    let services = Services::for_job(&job);
    Orchestrator::new(Arc::new(job), services)
}

async fn run_backup(config: BackupConfig, report: Option<&Path>) -> Result<i32> {
    let Some(job) = job_or_abort(config) else {
        return Ok(EXIT_ABORTED);
    };
    let deadline = job.deadline;
    let orchestrator = orchestrator(job);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal_or_deadline(cancel.clone(), deadline));

    let result = orchestrator.run(cancel.clone()).await;
    cancel.cancel();
    result.log_summary();

    if let Some(path) = report {
        let json = serde_json::to_vec_pretty(&result)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Run report written");
    }

    Ok(result.exit_code())
}

/// Cancel `token` on Ctrl-C or once `deadline` elapses. Returns quietly once
/// the token is cancelled elsewhere.
async fn cancel_on_signal_or_deadline(token: CancellationToken, deadline: Option<Duration>) {
    let deadline = async {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = token.cancelled() => return,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, cancelling run");
        }
        _ = deadline => {
            tracing::warn!("Run deadline reached, cancelling run");
        }
    }
    token.cancel();
}

fn run_check(config: BackupConfig) -> Result<i32> {
    let Some(job) = job_or_abort(config) else {
        return Ok(EXIT_ABORTED);
    };
    let orchestrator = orchestrator(job);

    println!("Required tools:");
    for tool in orchestrator.required_tools() {
        match find_executable(&tool) {
            Some(path) => println!("  ✓ {} ({})", tool, path.display()),
            None => println!("  ✗ {}", tool),
        }
    }

    match orchestrator.check_prerequisites() {
        Ok(()) => {
            tracing::info!("All prerequisites present");
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "Prerequisite check failed");
            Ok(EXIT_ABORTED)
        }
    }
}

async fn run_prune(config: BackupConfig) -> Result<i32> {
    let Some(job) = job_or_abort(config) else {
        return Ok(EXIT_ABORTED);
    };

    let report = orchestrator(job).apply_retention().await;
    for path in &report.deleted {
        println!("pruned {}", path.display());
    }
    if report.failures.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_PARTIAL_FAILURE)
    }
}

async fn run_verify(path: &Path) -> i32 {
    match archive::verify(path, &Sha256Checksummer).await {
        Ok(verified) => {
            println!(
                "{}: OK ({} {} bytes, sha256 {})",
                verified.archive, verified.payload, verified.payload_size, verified.checksum
            );
            EXIT_SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Archive verification failed");
            EXIT_ABORTED
        }
    }
}

fn show_config(config: Option<&BackupConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}

//! CLI entry point for auto-cfr
//!
//! Runs a single pass over the input directory and exits with a non-zero
//! status if any file failed.

use auto_cfr::{Config, RunCoordinator};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// auto-cfr - Convert variable frame rate videos to constant frame rate with HandBrakeCLI
#[derive(Parser, Debug)]
#[command(name = "auto-cfr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the source videos
    input: PathBuf,

    /// Directory the encoded videos are written to
    output: PathBuf,

    /// Directory the source videos are moved to once encoded
    archive: PathBuf,

    /// Path to an optional configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Skip the encoder availability check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Log every encoder output line
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose {
            "auto_cfr=debug,auto_cfr_cli=debug".to_string()
        } else {
            "auto_cfr=info,auto_cfr_cli=info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let config = match Config::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let coordinator = RunCoordinator::with_handbrake(args.input, args.output, args.archive, config);

    if args.skip_checks {
        tracing::warn!("Skipping encoder check (--skip-checks enabled)");
    }
    if let Err(e) = coordinator.preflight(!args.skip_checks) {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "Running with {} worker(s) on {} core(s)",
        coordinator.plan().workers,
        coordinator.plan().total_cores
    );

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight jobs");
            signal_stop.store(true, Ordering::SeqCst);
        }
    });

    let report = match coordinator.run_pass(stop).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Pass failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(path) = args.report {
        if let Err(e) = report.write_json(&path) {
            tracing::error!("Failed to write report to {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        tracing::info!("Report written to {}", path.display());
    }

    ExitCode::from(report.exit_code() as u8)
}

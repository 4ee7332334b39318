use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use listing_watcher::config::LoggingConfig;
use listing_watcher::{AppConfig, Runner};

const EXIT_CYCLE_FAILED: u8 = 1;
const EXIT_SETUP_FAILED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "listing-watcher", version, about = "Watch a listings feed and email changes")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Run a single cycle and exit
    #[arg(long, conflicts_with_all = ["test", "stats"])]
    once: bool,

    /// Check the feed, the database and SMTP, then send a sample alert
    #[arg(long, conflicts_with = "stats")]
    test: bool,

    /// Print database statistics and exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (config, _guard) = match setup(&cli) {
        Ok(setup) => setup,
        Err(e) => {
            eprintln!("Startup failed: {:#}", e);
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    info!("Starting listing watcher...");

    let mut runner = match Runner::from_config(&config).await {
        Ok(runner) => runner,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    if cli.stats {
        return match runner.stats_report(10).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Could not read statistics: {}", e);
                ExitCode::from(EXIT_CYCLE_FAILED)
            }
        };
    }

    if cli.test {
        let report = runner.self_test().await;
        return if report.passed() {
            info!("Self-test passed");
            ExitCode::SUCCESS
        } else {
            error!("Self-test failed");
            ExitCode::from(EXIT_CYCLE_FAILED)
        };
    }

    if cli.once {
        let report = runner.run_once().await;
        return if report.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(EXIT_CYCLE_FAILED)
        };
    }

    runner.run_continuous(shutdown_signal()).await;
    runner.store().close().await;
    info!("Shutting down...");

    ExitCode::SUCCESS
}

fn setup(cli: &Cli) -> Result<(AppConfig, Option<WorkerGuard>)> {
    let config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let guard = init_tracing(&config.logging)?;
    Ok((config, guard))
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("listing_watcher={}", logging.level))
            .with_context(|| format!("invalid log level {}", logging.level))?,
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false));

    match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "listing-watcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init()?;
            Ok(None)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

//! `run` command implementation.

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tracing::info;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, RunOptions};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        destinations = config.destinations.len(),
        route_field = ?config.intake.route_field,
        default_destination = ?config.intake.default_destination,
        "Configuration loaded"
    );

    let options = RunOptions {
        cursor_file: args.cursor_file.clone(),
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        dry_run: args.dry_run,
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let stats = Pipeline::new(config, options)
        .run(stdin, shutdown_signal())
        .await?;

    stats.print_summary();
    info!("Batchline finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
///
/// If a handler cannot be installed that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

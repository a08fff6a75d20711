//! Pipeline orchestrator - stdin records through the router to the sinks.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::AsyncBufRead;
use tracing::{info, instrument, warn};

use batcher::Router;
use contracts::{ContractError, PipelineConfig};
use delivery::{ConfigFactory, CursorFile, CursorTarget};

use super::{LineSource, RunStats};
use crate::error::CliError;

/// Run-time options from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Persist resolved positions here (None = log only)
    pub cursor_file: Option<PathBuf>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Replace every sink with a LogSink
    pub dry_run: bool,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, options: RunOptions) -> Self {
        Self { config, options }
    }

    /// Deliver every record from `input` until end of input or `shutdown`
    ///
    /// All destinations are flushed and closed before returning, on every
    /// path.
    #[instrument(name = "pipeline_run", skip_all, fields(dry_run = self.options.dry_run))]
    pub async fn run<R, S>(self, input: R, shutdown: S) -> Result<RunStats>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let start_time = Instant::now();

        if let Some(port) = self.options.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let cursor_file = match self.options.cursor_file {
            Some(ref path) => {
                let file = CursorFile::open(path)
                    .await
                    .with_context(|| format!("Failed to open cursor file {}", path.display()))?;
                Some(Arc::new(file))
            }
            None => None,
        };
        let cursor = match cursor_file {
            Some(ref file) => CursorTarget::File(Arc::clone(file)),
            None => CursorTarget::Log,
        };

        let config = Arc::new(self.config);
        let factory = ConfigFactory::new(Arc::clone(&config))
            .with_cursor(cursor)
            .with_dry_run(self.options.dry_run);
        let aggregator = factory.aggregator();
        let registry = factory.registry();

        let mut router = Router::new(factory);
        if let Some(ref name) = config.intake.default_destination {
            router = router.with_default_destination(name.clone());
        }
        for dest in &config.destinations {
            if let Err(e) = router.open(&dest.name).await {
                router.shutdown().await;
                return Err(e).with_context(|| format!("Failed to open destination '{}'", dest.name));
            }
        }
        info!(destinations = ?router.destinations(), "Pipeline started");

        let mut source = LineSource::new(input, config.intake.route_field.clone());
        let mut stats = RunStats::default();
        tokio::pin!(shutdown);

        let outcome: Result<(), CliError> = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    warn!("Received shutdown signal, flushing destinations...");
                    stats.interrupted = true;
                    break Ok(());
                }
                next = source.next_record() => match next {
                    Ok(Some(record)) => {
                        let line = record.position().to_string();
                        match router.send(record).await {
                            Ok(()) => {}
                            Err(e @ (ContractError::EmptyRecord
                            | ContractError::UnknownDestination { .. })) => {
                                stats.records_rejected += 1;
                                warn!(line = %line, error = %e, "Record rejected");
                            }
                            Err(source) => break Err(CliError::Delivery { line, source }),
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
            }
        };

        stats.lines_read = source.lines_read();

        info!("Shutting down pipeline...");
        router.shutdown().await;
        if let Some(ref file) = cursor_file {
            if let Err(e) = file.sync().await {
                warn!(path = %file.path().display(), error = %e, "Cursor file not fully written");
            }
        }
        outcome.context("Pipeline execution failed")?;

        stats.duration = start_time.elapsed();
        stats.delivery = aggregator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .summary();
        stats.sinks = registry.snapshots();

        info!(
            lines = stats.lines_read,
            rejected = stats.records_rejected,
            sent = stats.total_sent(),
            dropped = stats.total_dropped(),
            duration_secs = stats.duration.as_secs_f64(),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

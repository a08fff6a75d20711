//! LogSink - logs batch summaries via tracing

use std::sync::Arc;

use tracing::{info, instrument};

use contracts::{Batch, BatchAck, BatchFate, BatchSink, ContractError};

use crate::metrics::SinkMetrics;

/// Sink that logs each batch instead of delivering it (dry runs, debugging)
pub struct LogSink {
    name: String,
    metrics: Arc<SinkMetrics>,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: Arc::new(SinkMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    fn log_batch_summary(&self, batch: &Batch, ack: &BatchAck) {
        info!(
            sink = %self.name,
            seq = ack.seq(),
            records = batch.len(),
            bytes = batch.size_bytes(),
            position = ?batch.position().map(|p| p.as_str()),
            "Batch received"
        );
    }
}

impl BatchSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_flush",
        skip(self, batch, ack),
        fields(sink = %self.name, records = batch.len())
    )]
    async fn flush(&mut self, batch: Batch, ack: BatchAck) {
        self.metrics.add_received(batch.len());
        self.log_batch_summary(&batch, &ack);
        self.metrics.add_sent(batch.len());
        ack.resolve(BatchFate::Delivered);
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, metrics = %self.metrics.snapshot(), "LogSink closed");
        Ok(())
    }
}

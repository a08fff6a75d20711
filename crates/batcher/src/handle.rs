//! BatcherHandle - intake side of a running batcher

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use contracts::{BatchPolicy, ContractError, CursorTracker, Record};

use crate::engine::Command;

/// Handle to a running batcher control task
pub struct BatcherHandle {
    /// Destination name
    destination: String,
    /// Command channel into the control task
    tx: mpsc::Sender<Command>,
    /// Cursor shared with the sink acks
    tracker: CursorTracker,
    /// Control task handle
    task: JoinHandle<()>,
}

impl BatcherHandle {
    pub(crate) fn new(
        destination: String,
        tx: mpsc::Sender<Command>,
        tracker: CursorTracker,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            destination,
            tx,
            tracker,
            task,
        }
    }

    /// Get destination name
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn tracker(&self) -> &CursorTracker {
        &self.tracker
    }

    /// Enqueue a record
    ///
    /// Waits only while the intake queue is full.
    pub async fn send(&self, record: Record) -> Result<(), ContractError> {
        if record.is_empty() {
            return Err(ContractError::EmptyRecord);
        }
        self.tx
            .send(Command::Record(record))
            .await
            .map_err(|_| self.closed())
    }

    /// Flush whatever is pending
    ///
    /// Resolves once the pending batch (if any) has been handed to the sink.
    pub async fn flush(&self) -> Result<(), ContractError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| self.closed())?;
        done_rx.await.map_err(|_| self.closed())
    }

    /// Replace the batch policy
    ///
    /// Invalid thresholds are rejected here; valid ones are applied in order
    /// with the records already queued.
    pub async fn configure(&self, policy: BatchPolicy) -> Result<(), ContractError> {
        policy.validate()?;
        self.tx
            .send(Command::Configure(policy))
            .await
            .map_err(|_| self.closed())
    }

    /// Close intake, flush pending records and close the sink
    #[instrument(name = "batcher_handle_shutdown", skip(self), fields(destination = %self.destination))]
    pub async fn shutdown(self) {
        // Drop sender to signal the control task to stop
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(destination = %self.destination, error = ?e, "Batcher task panicked");
        }
        debug!(destination = %self.destination, "BatcherHandle shutdown complete");
    }

    fn closed(&self) -> ContractError {
        ContractError::ChannelClosed {
            destination: self.destination.clone(),
        }
    }
}

impl std::fmt::Debug for BatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatcherHandle")
            .field("destination", &self.destination)
            .field("tracker", &self.tracker)
            .finish()
    }
}

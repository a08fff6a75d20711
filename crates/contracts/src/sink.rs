//! BatchSink trait - Batcher output interface
//!
//! Defines the abstract interface for sinks.

use crate::{Batch, BatchAck, ContractError};

/// Final outcome of a flushed batch, as reported through its [`BatchAck`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFate {
    /// Every record accepted downstream
    Delivered,
    /// Some records accepted, `dropped` given up on
    PartiallyDelivered { dropped: usize },
    /// Nothing delivered; the whole batch is dropped
    Dropped { dropped: usize },
    /// Ack released without an explicit outcome
    Abandoned,
}

impl BatchFate {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::PartiallyDelivered { .. } => "partial",
            Self::Dropped { .. } => "dropped",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Batch delivery trait
///
/// All sink adapters must implement this trait. The batcher never retries:
/// once `flush` is called the batch and its ack belong to the sink.
#[trait_variant::make(BatchSink: Send)]
pub trait LocalBatchSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Take ownership of a non-empty batch
    ///
    /// Returns once the batch is delivered, partially delivered, given up on,
    /// or accepted by a worker that will resolve `ack` later.
    async fn flush(&mut self, batch: Batch, ack: BatchAck);

    /// Release resources; in-flight work is awaited best-effort
    async fn close(&mut self) -> Result<(), ContractError>;
}

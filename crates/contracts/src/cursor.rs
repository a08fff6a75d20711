//! Cursor tracking - position acknowledgement back to the record source
//!
//! Batches are numbered in flush order. Sinks may finish them out of order
//! (concurrent commit workers), so the tracker only advances over a
//! contiguous prefix of resolved batches: the reported position never passes
//! a batch that is still in flight.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{BatchFate, PositionToken};

/// Upstream consumer of resolved positions
pub trait PositionSink: Send + Sync {
    /// Called with the newest position whose batch (and every earlier batch)
    /// has a known fate
    fn on_batch_resolved(&self, position: &PositionToken);
}

impl<F> PositionSink for F
where
    F: Fn(&PositionToken) + Send + Sync,
{
    fn on_batch_resolved(&self, position: &PositionToken) {
        self(position)
    }
}

#[derive(Debug, Default)]
struct CursorState {
    /// Sequence number handed to the next issued ack
    issued: u64,
    /// Lowest sequence number not yet resolved
    watermark: u64,
    /// Resolved batches waiting for an earlier one
    parked: BTreeMap<u64, Option<PositionToken>>,
    /// Last position reported upstream
    position: Option<PositionToken>,
}

/// Records the position of the most recently fully-handled batch
///
/// One tracker per destination. Cloning shares the same state.
#[derive(Clone)]
pub struct CursorTracker {
    destination: Arc<str>,
    state: Arc<Mutex<CursorState>>,
    /// Held across `on_batch_resolved`; taken before `state` is released so
    /// reports reach the sink in watermark order
    reporting: Arc<Mutex<()>>,
    sink: Arc<dyn PositionSink>,
}

impl std::fmt::Debug for CursorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorTracker")
            .field("destination", &self.destination)
            .field("position", &self.position())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl CursorTracker {
    pub fn new(destination: impl Into<String>, sink: Arc<dyn PositionSink>) -> Self {
        Self {
            destination: Arc::from(destination.into()),
            state: Arc::new(Mutex::new(CursorState::default())),
            reporting: Arc::new(Mutex::new(())),
            sink,
        }
    }

    /// Tracker that reports nowhere (tests, fire-and-forget destinations)
    pub fn detached(destination: impl Into<String>) -> Self {
        Self::new(destination, Arc::new(|_: &PositionToken| {}))
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Issue the ack for the next flushed batch
    pub fn issue(&self, position: Option<PositionToken>) -> BatchAck {
        let mut state = self.lock();
        let seq = state.issued;
        state.issued += 1;
        BatchAck {
            seq,
            position,
            tracker: Some(self.clone()),
        }
    }

    /// Last position reported upstream
    pub fn position(&self) -> Option<PositionToken> {
        self.lock().position.clone()
    }

    /// Batches issued but not yet covered by the watermark
    pub fn in_flight(&self) -> u64 {
        let state = self.lock();
        state.issued - state.watermark
    }

    fn resolve(&self, seq: u64, position: Option<PositionToken>) {
        let mut state = self.lock();
        state.parked.insert(seq, position);

        let mut advanced = None;
        loop {
            let next = state.watermark;
            let Some(position) = state.parked.remove(&next) else {
                break;
            };
            state.watermark += 1;
            if position.is_some() {
                advanced = position;
            }
        }
        let Some(position) = advanced else {
            return;
        };
        state.position = Some(position.clone());

        // Sinks may do I/O, so the state lock is not held while reporting.
        let _reporting = self
            .reporting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(state);
        self.sink.on_batch_resolved(&position);
    }

    fn lock(&self) -> MutexGuard<'_, CursorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Acknowledgement travelling with a flushed batch
///
/// Resolving it, or dropping it unresolved, marks the batch's fate as known.
#[must_use = "an unresolved ack is treated as abandoned when dropped"]
#[derive(Debug)]
pub struct BatchAck {
    seq: u64,
    position: Option<PositionToken>,
    tracker: Option<CursorTracker>,
}

impl BatchAck {
    /// Flush-order sequence number within the destination
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn position(&self) -> Option<&PositionToken> {
        self.position.as_ref()
    }

    /// Report the batch's final fate
    pub fn resolve(mut self, fate: BatchFate) -> BatchFate {
        self.finish();
        fate
    }

    fn finish(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.resolve(self.seq, self.position.take());
        }
    }
}

impl Drop for BatchAck {
    fn drop(&mut self) {
        self.finish();
    }
}

//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace: the
//! record and batch data model, the batching policy, the sink capability and
//! the downstream client traits, and the position acknowledgement protocol.
//! Business crates depend on this crate only; reverse dependencies are
//! prohibited.
//!
//! ## Ownership model
//! - A [`Batch`] is owned by exactly one party at a time: the batcher while it
//!   accumulates, then the sink it was handed to.
//! - Every flushed batch travels with a [`BatchAck`]. Resolving (or dropping)
//!   the ack is the only way the upstream cursor moves.

mod cursor;
mod error;
mod pipeline_config;
mod policy;
mod putter;
mod record;
mod sink;

pub use cursor::{BatchAck, CursorTracker, PositionSink};
pub use error::*;
pub use pipeline_config::*;
pub use policy::BatchPolicy;
pub use putter::{
    ColumnValue, PutOutcome, RecordPutter, RowInserter, MAX_INSERT_PARAMS, MAX_PUT_BATCH,
};
pub use record::{Batch, PositionToken, Record};
pub use sink::{BatchFate, BatchSink};

//! Downstream client traits
//!
//! `RecordPutter` talks to a streaming-ingestion API, `RowInserter` to a
//! relational store. Neither retries; retry policy belongs to the sink adapter.

use bytes::Bytes;

use crate::ContractError;

/// Server-side limit on records per `put_many` call
pub const MAX_PUT_BATCH: usize = 500;

/// Bind parameters one PostgreSQL statement can carry
pub const MAX_INSERT_PARAMS: usize = 65_535;

/// Result of a `put_many` call that reached the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Indices (into the submitted slice) of the records that were rejected
    pub failed: Vec<usize>,
}

impl PutOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn with_failed(failed: Vec<usize>) -> Self {
        Self { failed }
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Streaming-ingestion client
#[trait_variant::make(RecordPutter: Send)]
pub trait LocalRecordPutter {
    /// Stream / destination name (used for logging)
    fn stream(&self) -> &str;

    /// Put a single record
    async fn put_one(&self, record: Bytes) -> Result<(), ContractError>;

    /// Put up to [`MAX_PUT_BATCH`] records in one call
    ///
    /// `Err` means the call itself failed (transport, auth); per-record
    /// rejections come back in [`PutOutcome::failed`].
    async fn put_many(&self, records: &[Bytes]) -> Result<PutOutcome, ContractError>;
}

/// A single cell of a row destined for a relational table
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Nested arrays / objects are stored as JSON
    Json(serde_json::Value),
}

/// Relational-store client
#[trait_variant::make(RowInserter: Send)]
pub trait LocalRowInserter {
    /// Insert every row in one round trip
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<ColumnValue>>,
    ) -> Result<(), ContractError>;
}

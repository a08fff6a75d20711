//! Record / Batch - intake data model
//!
//! Payloads are opaque bytes; the pipeline never inspects them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque upstream cursor value (queue offset, line number, sequence id...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionToken(String);

impl PositionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PositionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PositionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for PositionToken {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// A single record travelling through the pipeline
///
/// Immutable once created. Cloning is cheap (`Bytes` is reference counted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    payload: Bytes,
    position: PositionToken,
    routing_key: Option<String>,
}

impl Record {
    /// Create a record without a routing key
    pub fn new(payload: impl Into<Bytes>, position: impl Into<PositionToken>) -> Self {
        Self {
            payload: payload.into(),
            position: position.into(),
            routing_key: None,
        }
    }

    /// Create a record addressed to a named destination
    pub fn routed(
        payload: impl Into<Bytes>,
        position: impl Into<PositionToken>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            position: position.into(),
            routing_key: Some(routing_key.into()),
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn position(&self) -> &PositionToken {
        &self.position
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Release the payload, dropping cursor and routing metadata
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Ordered group of records with running size/count totals
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<Record>,
    bytes: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            bytes: 0,
        }
    }

    /// Append a record, keeping the byte total in step
    pub fn push(&mut self, record: Record) {
        self.bytes += record.len();
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Aggregate payload size
    pub fn size_bytes(&self) -> usize {
        self.bytes
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Position marker of the batch: the last record's token
    pub fn position(&self) -> Option<&PositionToken> {
        self.records.last().map(Record::position)
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Payloads in submission order
    pub fn payloads(&self) -> Vec<Bytes> {
        self.records.iter().map(|r| r.payload().clone()).collect()
    }
}

impl FromIterator<Record> for Batch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for record in iter {
            batch.push(record);
        }
        batch
    }
}

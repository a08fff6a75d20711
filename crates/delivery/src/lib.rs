//! # Delivery
//!
//! Sink adapters that take batches from the batcher and deliver them
//! downstream.
//!
//! - [`RetryingPutter`]: streaming-ingestion API; 500-record chunks, only the
//!   rejected records are resubmitted, doubling backoff, then drop
//! - [`ConcurrentCommitPool`]: relational store behind N workers with a
//!   rendezvous hand-off and a non-cancelling operation timeout
//! - [`LogSink`]: logs batch summaries (dry runs)
//!
//! [`ConfigFactory`] wires these to a [`batcher::Router`] from a
//! `PipelineConfig`.
//!
//! ## Features
//! - `firehose`: AWS Kinesis Data Firehose putter
//! - `postgres`: PostgreSQL row inserter for the commit pool

mod commit_pool;
mod error;
mod factory;
mod inserters;
mod metrics;
mod position;
pub mod putters;
mod retrying;
mod row_mapper;
mod sinks;

pub use commit_pool::{CommitPoolOptions, ConcurrentCommitPool, TableTarget};
pub use error::DeliveryError;
pub use factory::{ConfigFactory, SinkRegistry};
#[cfg(feature = "postgres")]
pub use inserters::PgRowInserter;
pub use inserters::build_insert_query;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use position::{CursorFile, CursorTarget, LogPositionSink};
pub use retrying::{RetryPolicy, RetryingPutter};
pub use row_mapper::RowMapper;
pub use sinks::LogSink;

//! PipelineConfig - Config Loader output
//!
//! Describes the full delivery topology: intake settings and one entry per
//! destination (batching thresholds plus sink-specific settings).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::BatchPolicy;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Record intake settings
    #[serde(default)]
    pub intake: IntakeConfig,

    /// Destination definitions
    pub destinations: Vec<DestinationConfig>,
}

/// Record intake and routing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Capacity of each batcher's intake channel (backpressure point)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// JSON field whose string value selects the destination
    #[serde(default)]
    pub route_field: Option<String>,

    /// Destination for records without a routing key
    #[serde(default)]
    pub default_destination: Option<String>,

    /// Putter destination cloned for routing keys with no explicit entry;
    /// the clone's stream name is the routing key
    #[serde(default)]
    pub template_destination: Option<String>,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            route_field: None,
            default_destination: None,
            template_destination: None,
        }
    }
}

fn default_channel_capacity() -> usize {
    100
}

/// One logical destination: a batcher plus its sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Destination name (also the routing key that selects it)
    pub name: String,

    /// Sink adapter type
    pub sink_type: SinkType,

    /// Timed flush interval
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Record count that triggers a flush
    #[serde(default = "default_flush_count")]
    pub flush_count: usize,

    /// Aggregate byte size that triggers a flush
    #[serde(default = "default_flush_size_bytes")]
    pub flush_size_bytes: usize,

    /// Streaming-ingestion settings (sink_type = "putter")
    #[serde(default)]
    pub putter: Option<PutterConfig>,

    /// Relational-store settings (sink_type = "commit_pool")
    #[serde(default)]
    pub commit_pool: Option<CommitPoolConfig>,
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_flush_count() -> usize {
    10
}

fn default_flush_size_bytes() -> usize {
    1024 * 1024
}

impl DestinationConfig {
    /// Batching thresholds for this destination
    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy::new(
            self.flush_count,
            self.flush_size_bytes,
            Duration::from_millis(self.flush_interval_ms),
        )
    }

    /// Copy of a putter destination retargeted at another stream
    pub fn retargeted(&self, name: &str) -> Self {
        let mut config = self.clone();
        config.name = name.to_string();
        if let Some(ref mut putter) = config.putter {
            putter.stream = name.to_string();
        }
        config
    }
}

/// Sink adapter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Streaming-ingestion API with partial-failure retry
    Putter,
    /// Relational store behind a worker pool
    CommitPool,
    /// Log batch summaries only
    Log,
}

/// Streaming-ingestion client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutterConfig {
    /// Client implementation
    pub kind: PutterKind,

    /// Delivery stream name
    pub stream: String,

    /// Kind-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Streaming-ingestion client implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutterKind {
    /// AWS Kinesis Data Firehose
    Firehose,
    /// One UDP datagram per record
    Udp,
    /// Newline-delimited records appended to a local file
    File,
}

/// Relational-store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPoolConfig {
    /// Number of concurrent commit workers
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Time a worker waits on one insert before reporting it stuck
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Target schema
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Target table
    pub table: String,

    /// Table columns, in insert order
    pub columns: Vec<String>,

    /// Record fields feeding each column (same length as `columns`)
    pub fields: Vec<String>,

    /// Write NULL for fields missing from a record instead of dropping it
    #[serde(default = "default_allow_missing_fields")]
    pub allow_missing_fields: bool,

    /// Database connection string
    #[serde(default)]
    pub database_url: Option<String>,

    /// Upper bound on pooled database connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_worker_pool_size() -> usize {
    5
}

fn default_operation_timeout_ms() -> u64 {
    60_000
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_allow_missing_fields() -> bool {
    true
}

fn default_max_connections() -> u32 {
    10
}

impl CommitPoolConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl PipelineConfig {
    /// Look up a destination by name
    pub fn destination(&self, name: &str) -> Option<&DestinationConfig> {
        self.destinations.iter().find(|d| d.name == name)
    }
}

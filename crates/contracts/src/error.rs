//! Layered error definitions
//!
//! Categorized by source: config / intake / delivery

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Intake Errors =====
    /// Zero-length record rejected at send time
    #[error("empty records can't be sent")]
    EmptyRecord,

    /// Batcher control task is no longer running
    #[error("batcher for destination '{destination}' is closed")]
    ChannelClosed { destination: String },

    /// No destination is configured for a routing key
    #[error("no destination configured for routing key '{key}'")]
    UnknownDestination { key: String },

    // ===== Delivery Errors =====
    /// A subset of a submitted batch was rejected by the downstream
    #[error("sink '{sink_name}' rejected {failed} of {total} records")]
    PartialBatchFailure {
        sink_name: String,
        failed: usize,
        total: usize,
    },

    /// Retry budget exhausted or non-retryable failure; the records are dropped
    #[error("sink '{sink_name}' dropped {dropped} records: {message}")]
    TerminalBatchFailure {
        sink_name: String,
        dropped: usize,
        message: String,
    },

    /// A sink operation exceeded its allotted time (not cancelled)
    #[error("sink '{sink_name}' operation still running after {waited_ms}ms")]
    OperationTimeout { sink_name: String, waited_ms: u64 },

    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    /// Sink connection error
    #[error("sink '{sink_name}' connection error: {message}")]
    SinkConnection { sink_name: String, message: String },

    /// Record could not be turned into a table row
    #[error("row mapping error: {message}")]
    RowMapping { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create sink connection error
    pub fn sink_connection(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkConnection {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create terminal batch failure
    pub fn terminal(
        sink_name: impl Into<String>,
        dropped: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::TerminalBatchFailure {
            sink_name: sink_name.into(),
            dropped,
            message: message.into(),
        }
    }

    /// Create row mapping error
    pub fn row_mapping(message: impl Into<String>) -> Self {
        Self::RowMapping {
            message: message.into(),
        }
    }

    /// Whether this error belongs to the startup-time configuration category
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse { .. } | Self::ConfigValidation { .. }
        )
    }
}

//! Error types for CLI operations.

use thiserror::Error;

use contracts::ContractError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Reading the record stream failed
    #[error("Failed to read input at line {line}: {source}")]
    Input {
        line: u64,
        #[source]
        source: std::io::Error,
    },

    /// A destination failed for a reason other than the record itself
    #[error("Delivery failed at line {line}: {source}")]
    Delivery {
        line: String,
        #[source]
        source: ContractError,
    },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }
}

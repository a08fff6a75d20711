//! BatchPolicy - flush thresholds

use std::time::Duration;

use crate::ContractError;

/// Thresholds that trigger a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Number of records that triggers a flush
    pub max_count: usize,
    /// Aggregate payload size that triggers a flush
    pub max_bytes: usize,
    /// Longest a non-empty batch waits before a timed flush
    pub max_interval: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_count: 10,
            max_bytes: 1024 * 1024,
            max_interval: Duration::from_secs(1),
        }
    }
}

impl BatchPolicy {
    pub fn new(max_count: usize, max_bytes: usize, max_interval: Duration) -> Self {
        Self {
            max_count,
            max_bytes,
            max_interval,
        }
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Reject thresholds that would make the batcher spin or never flush
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.max_count == 0 {
            return Err(ContractError::config_validation(
                "max_count",
                "max_count must be >= 1",
            ));
        }
        if self.max_bytes == 0 {
            return Err(ContractError::config_validation(
                "max_bytes",
                "max_bytes must be >= 1",
            ));
        }
        if self.max_interval.is_zero() {
            return Err(ContractError::config_validation(
                "max_interval",
                "max_interval must be > 0",
            ));
        }
        Ok(())
    }
}

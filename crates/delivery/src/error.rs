//! Delivery error types

use thiserror::Error;

use contracts::ContractError;

/// Delivery-specific errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Feature not compiled into this build
    #[error("sink '{name}' requires the '{feature}' feature")]
    FeatureDisabled { name: String, feature: &'static str },

    /// Error from a contract-level operation
    #[error("sink error: {0}")]
    Contract(#[from] ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Create a sink creation error
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<DeliveryError> for ContractError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Contract(inner) => inner,
            DeliveryError::Io(inner) => ContractError::Io(inner),
            DeliveryError::SinkCreation { ref name, .. }
            | DeliveryError::FeatureDisabled { ref name, .. } => {
                ContractError::sink_connection(name.clone(), err.to_string())
            }
        }
    }
}

//! Bridge error types

use thiserror::Error;

use crate::data::broker::BrokerError;

/// Error returned by the publish and fetch bridges
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Caller input rejected before reaching the broker
    #[error("{0}")]
    Validation(String),

    /// Storage unit or cursor vanished between provisioning and use
    #[error("{0}")]
    ResourceNotFound(String),

    /// No storage unit accepts the topic, even after provisioning
    #[error("{0}")]
    NoMatchingStorageUnit(String),

    /// Any other broker failure
    #[error("{0}")]
    Broker(String),
}

impl BridgeError {
    /// Stable category label exposed to HTTP callers
    pub fn category(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "validation_error",
            BridgeError::ResourceNotFound(_) => "resource_not_found",
            BridgeError::NoMatchingStorageUnit(_) => "no_matching_storage_unit",
            BridgeError::Broker(_) => "broker_fault",
        }
    }
}

impl From<BrokerError> for BridgeError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::NotFound { .. } => BridgeError::ResourceNotFound(err.to_string()),
            BrokerError::NoMatchingStorageUnit(_) => {
                BridgeError::NoMatchingStorageUnit(err.to_string())
            }
            _ => BridgeError::Broker(err.to_string()),
        }
    }
}

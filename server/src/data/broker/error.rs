//! Broker error types

use std::fmt;

use thiserror::Error;

/// Broker resource kinds, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    StorageUnit,
    Cursor,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::StorageUnit => write!(f, "storage unit"),
            ResourceKind::Cursor => write!(f, "cursor"),
        }
    }
}

/// Error type for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("{kind} name already in use: {name}")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    #[error("no storage unit matches subject '{0}'")]
    NoMatchingStorageUnit(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("malformed broker response: {0}")]
    Protocol(String),

    #[error("broker closed")]
    Closed,

    #[error("broker error: {0}")]
    Operation(String),
}

impl BrokerError {
    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<deadpool_redis::PoolError> for BrokerError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        BrokerError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for BrokerError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            BrokerError::Connection(err.to_string())
        } else {
            BrokerError::Operation(err.to_string())
        }
    }
}

//! Durable subject-addressed broker
//!
//! Pluggable backends behind the `BrokerClient` trait:
//! - In-memory (default) - local-only, for development and single-process
//! - Redis - durable, Redis Streams with consumer groups as cursors
//!
//! ## Configuration
//!
//! - `broker.backend = "memory"` → `MemoryBroker`
//! - `broker.backend = "redis"` → `RedisBroker` at `broker.url`

mod backend;
mod error;
mod memory;
mod redis;
mod spec;
pub mod subject;

use std::sync::Arc;

pub use backend::BrokerClient;
pub use error::{BrokerError, ResourceKind};
pub use memory::MemoryBroker;
pub use redis::RedisBroker;
pub use spec::{
    AckPolicy, BrokerMessage, CursorInfo, CursorSpec, DEFAULT_ACK_WAIT, DeliverPolicy,
    DiscardPolicy, MAX_REPLICAS, PublishAck, RetentionPolicy, StorageMedium, StorageUnitInfo,
    StorageUnitSpec,
};

use crate::core::config::{BrokerBackend, BrokerConfig};
use crate::utils::url::redact_url;

/// Connect to the configured broker backend
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn BrokerClient>, BrokerError> {
    match config.backend {
        BrokerBackend::Memory => {
            tracing::debug!("Using in-memory broker");
            Ok(Arc::new(MemoryBroker::new()))
        }
        BrokerBackend::Redis => {
            let url = config.url.as_deref().ok_or_else(|| {
                BrokerError::InvalidConfig("broker.url is required for the redis backend".into())
            })?;
            tracing::debug!(url = %redact_url(url), "Using Redis broker");
            Ok(Arc::new(RedisBroker::connect(url).await?))
        }
    }
}

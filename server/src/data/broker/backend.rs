//! Broker client trait definition
//!
//! Defines the interface for broker implementations (memory and Redis).
//! Delivery is pull-based and at-least-once: a pulled message stays pending
//! on its cursor until acknowledged, and is redelivered once its ack wait
//! elapses.

use std::time::Duration;

use async_trait::async_trait;

use super::error::BrokerError;
use super::spec::{
    BrokerMessage, CursorInfo, CursorSpec, PublishAck, StorageUnitInfo, StorageUnitSpec,
};

/// Broker client trait
///
/// Both the in-memory and Redis brokers implement this trait. Implementations
/// must be safe for concurrent use from many request tasks.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    // =========================================================================
    // Publishing
    // =========================================================================

    /// Store a message on the storage unit whose subjects cover `subject`
    ///
    /// Fails with `NoMatchingStorageUnit` when no storage unit accepts the
    /// subject.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<PublishAck, BrokerError>;

    // =========================================================================
    // Storage units
    // =========================================================================

    /// Create a storage unit
    ///
    /// Fails with `AlreadyExists` when the name is taken, whatever the
    /// existing definition is. The existing unit is left untouched.
    async fn create_storage_unit(
        &self,
        spec: &StorageUnitSpec,
    ) -> Result<StorageUnitInfo, BrokerError>;

    async fn storage_unit_info(&self, name: &str) -> Result<StorageUnitInfo, BrokerError>;

    /// Name of the storage unit whose subjects cover `subject`, if any
    async fn find_storage_unit(&self, subject: &str) -> Result<Option<String>, BrokerError>;

    // =========================================================================
    // Cursors
    // =========================================================================

    /// Create a durable cursor on a storage unit
    ///
    /// Fails with `AlreadyExists` when the durable name is taken on that unit.
    async fn create_cursor(
        &self,
        storage_unit: &str,
        spec: &CursorSpec,
    ) -> Result<CursorInfo, BrokerError>;

    async fn cursor_info(
        &self,
        storage_unit: &str,
        durable_name: &str,
    ) -> Result<CursorInfo, BrokerError>;

    /// Pull up to `max_messages` from a cursor
    ///
    /// Waits at most `expires` for a message to arrive and returns an empty
    /// batch if none did. Returned messages are pending until acknowledged.
    async fn pull(
        &self,
        storage_unit: &str,
        durable_name: &str,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<BrokerMessage>, BrokerError>;

    /// Acknowledge a pulled message so it is never redelivered on this cursor
    async fn ack(
        &self,
        storage_unit: &str,
        durable_name: &str,
        message_id: &str,
    ) -> Result<(), BrokerError>;

    // =========================================================================
    // Health and lifecycle
    // =========================================================================

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), BrokerError>;

    /// Stop accepting operations and release waiting pulls
    async fn close(&self);

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

//! Broker wrapper for bridge tests: counts calls and injects failures

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::data::broker::{
    BrokerClient, BrokerError, BrokerMessage, CursorInfo, CursorSpec, MemoryBroker, PublishAck,
    ResourceKind, StorageUnitInfo, StorageUnitSpec,
};

#[derive(Default)]
pub struct CountingBroker {
    inner: RwLock<MemoryBroker>,
    publishes: AtomicUsize,
    unit_creates: AtomicUsize,
    cursor_creates: AtomicUsize,
    cursors_created: AtomicUsize,
    fail_acks: AtomicBool,
    lose_cursors: AtomicBool,
}

impl CountingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MemoryBroker {
        self.inner.read().clone()
    }

    /// Swap in an empty broker, as after a broker-side flush or restart
    pub fn reset_state(&self) {
        *self.inner.write() = MemoryBroker::new();
    }

    pub fn publish_calls(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn create_unit_calls(&self) -> usize {
        self.unit_creates.load(Ordering::SeqCst)
    }

    pub fn create_cursor_calls(&self) -> usize {
        self.cursor_creates.load(Ordering::SeqCst)
    }

    /// Cursor creations the broker accepted
    pub fn created_cursors(&self) -> usize {
        self.cursors_created.load(Ordering::SeqCst)
    }

    pub fn fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    /// Pulls report the cursor missing, as after a broker-side deletion
    pub fn lose_cursors(&self, lose: bool) {
        self.lose_cursors.store(lose, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerClient for CountingBroker {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<PublishAck, BrokerError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.inner().publish(subject, payload).await
    }

    async fn create_storage_unit(
        &self,
        spec: &StorageUnitSpec,
    ) -> Result<StorageUnitInfo, BrokerError> {
        self.unit_creates.fetch_add(1, Ordering::SeqCst);
        self.inner().create_storage_unit(spec).await
    }

    async fn storage_unit_info(&self, name: &str) -> Result<StorageUnitInfo, BrokerError> {
        self.inner().storage_unit_info(name).await
    }

    async fn find_storage_unit(&self, subject: &str) -> Result<Option<String>, BrokerError> {
        self.inner().find_storage_unit(subject).await
    }

    async fn create_cursor(
        &self,
        storage_unit: &str,
        spec: &CursorSpec,
    ) -> Result<CursorInfo, BrokerError> {
        self.cursor_creates.fetch_add(1, Ordering::SeqCst);
        let info = self.inner().create_cursor(storage_unit, spec).await?;
        self.cursors_created.fetch_add(1, Ordering::SeqCst);
        Ok(info)
    }

    async fn cursor_info(
        &self,
        storage_unit: &str,
        durable_name: &str,
    ) -> Result<CursorInfo, BrokerError> {
        self.inner().cursor_info(storage_unit, durable_name).await
    }

    async fn pull(
        &self,
        storage_unit: &str,
        durable_name: &str,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        if self.lose_cursors.load(Ordering::SeqCst) {
            return Err(BrokerError::not_found(ResourceKind::Cursor, durable_name));
        }
        self.inner()
            .pull(storage_unit, durable_name, max_messages, expires)
            .await
    }

    async fn ack(
        &self,
        storage_unit: &str,
        durable_name: &str,
        message_id: &str,
    ) -> Result<(), BrokerError> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("connection reset during ack".into()));
        }
        self.inner().ack(storage_unit, durable_name, message_id).await
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        self.inner().health_check().await
    }

    async fn close(&self) {
        self.inner().close().await
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }
}

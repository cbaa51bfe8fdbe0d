//! Fetch bridge
//!
//! Retrieves at most one message for a topic within a bounded wait. The
//! message is acknowledged before it is returned, so a caller never sees a
//! payload the broker may hand out again.

use std::sync::Arc;
use std::time::Duration;

use crate::data::broker::{BrokerClient, BrokerError, ResourceKind};

use super::error::BridgeError;
use super::naming;
use super::provision::{CursorTemplate, ProvisioningCoordinator, StorageUnitTemplate};

pub struct FetchBridge {
    broker: Arc<dyn BrokerClient>,
    coordinator: Arc<ProvisioningCoordinator>,
    units: StorageUnitTemplate,
    cursors: CursorTemplate,
}

impl FetchBridge {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        coordinator: Arc<ProvisioningCoordinator>,
        units: StorageUnitTemplate,
        cursors: CursorTemplate,
    ) -> Self {
        Self {
            broker,
            coordinator,
            units,
            cursors,
        }
    }

    /// Fetch one message for `topic`, waiting at most `wait`.
    /// `Ok(None)` means nothing arrived in time.
    pub async fn fetch_one(
        &self,
        topic: &str,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BridgeError> {
        let storage_unit = self.resolve_storage_unit(topic).await?;
        let cursor = self.cursors.spec(naming::cursor_name(topic), topic);
        self.coordinator
            .ensure_cursor(&storage_unit, &cursor)
            .await?;

        let messages = match self
            .broker
            .pull(&storage_unit, &cursor.durable_name, 1, wait)
            .await
        {
            Ok(messages) => messages,
            Err(e) => return Err(self.fault(topic, &storage_unit, &cursor.durable_name, e).await),
        };

        let Some(message) = messages.into_iter().next() else {
            tracing::trace!(topic, "No message before expiry");
            return Ok(None);
        };

        if let Err(e) = self
            .broker
            .ack(&storage_unit, &cursor.durable_name, &message.id)
            .await
        {
            return Err(self.fault(topic, &storage_unit, &cursor.durable_name, e).await);
        }

        tracing::debug!(
            topic,
            storage_unit = %storage_unit,
            id = %message.id,
            redelivered = message.redelivered,
            "Fetched message"
        );
        Ok(Some(message.payload))
    }

    /// Storage unit covering the topic, provisioning a per-topic one if none does
    async fn resolve_storage_unit(&self, topic: &str) -> Result<String, BridgeError> {
        if let Some(name) = self.broker.find_storage_unit(topic).await? {
            return Ok(name);
        }

        let spec = self
            .units
            .spec(naming::storage_unit_name(topic), vec![topic.to_string()]);
        // Nothing covers the topic, so remembered resources for it are stale
        self.coordinator.forget_storage_unit(&spec.name).await;
        self.coordinator
            .forget_cursor(&spec.name, &naming::cursor_name(topic))
            .await;
        self.coordinator.ensure_storage_unit(&spec).await?;
        Ok(spec.name)
    }

    async fn fault(
        &self,
        topic: &str,
        storage_unit: &str,
        durable_name: &str,
        err: BrokerError,
    ) -> BridgeError {
        if let BrokerError::NotFound { kind, .. } = &err {
            if *kind == ResourceKind::StorageUnit {
                self.coordinator.forget_storage_unit(storage_unit).await;
            }
            self.coordinator
                .forget_cursor(storage_unit, durable_name)
                .await;
        }
        tracing::warn!(topic, storage_unit, cursor = durable_name, error = %err, "Fetch failed");
        err.into()
    }
}

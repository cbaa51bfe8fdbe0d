//! Publish bridge
//!
//! Publishes a payload under a topic. When no storage unit accepts the
//! topic, provisions one named after the topic and retries exactly once.

use std::sync::Arc;

use crate::data::broker::{BrokerClient, BrokerError};

use super::codec::Payload;
use super::error::BridgeError;
use super::naming;
use super::provision::{ProvisioningCoordinator, StorageUnitTemplate};

/// Receipt for a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub storage_unit: String,
    pub id: String,
    /// True if a storage unit had to be provisioned first
    pub provisioned: bool,
}

pub struct PublishBridge {
    broker: Arc<dyn BrokerClient>,
    coordinator: Arc<ProvisioningCoordinator>,
    template: StorageUnitTemplate,
}

impl PublishBridge {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        coordinator: Arc<ProvisioningCoordinator>,
        template: StorageUnitTemplate,
    ) -> Self {
        Self {
            broker,
            coordinator,
            template,
        }
    }

    pub async fn publish(&self, topic: &str, payload: Payload) -> Result<Published, BridgeError> {
        let bytes = payload.into_bytes()?;

        match self.broker.publish(topic, &bytes).await {
            Ok(ack) => Ok(Published {
                storage_unit: ack.storage_unit,
                id: ack.id,
                provisioned: false,
            }),
            Err(BrokerError::NoMatchingStorageUnit(_)) => {
                let spec = self
                    .template
                    .spec(naming::storage_unit_name(topic), vec![topic.to_string()]);
                tracing::debug!(topic, storage_unit = %spec.name, "No storage unit accepts topic, provisioning");
                // The broker just rejected the topic, so a remembered unit is stale
                self.coordinator.forget_storage_unit(&spec.name).await;
                self.coordinator.ensure_storage_unit(&spec).await?;

                let ack = match self.broker.publish(topic, &bytes).await {
                    Ok(ack) => ack,
                    Err(e) => {
                        tracing::warn!(topic, error = %e, "Publish retry failed");
                        if matches!(e, BrokerError::NoMatchingStorageUnit(_)) {
                            self.coordinator.forget_storage_unit(&spec.name).await;
                        }
                        return Err(e.into());
                    }
                };
                Ok(Published {
                    storage_unit: ack.storage_unit,
                    id: ack.id,
                    provisioned: true,
                })
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "Publish failed");
                Err(e.into())
            }
        }
    }
}

//! Provisioning coordinator
//!
//! Ensures storage units and cursors exist before the bridges use them.
//! Creation is attempt-then-classify: the broker arbitrates races, and an
//! "already in use" answer counts as success. Resources seen to exist are
//! remembered for a while to skip the broker round trip.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::data::broker::{
    BrokerClient, BrokerError, CursorSpec, DEFAULT_ACK_WAIT, DeliverPolicy, DiscardPolicy,
    StorageMedium, StorageUnitSpec,
};

/// Outcome of an ensure call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}

/// Retention settings applied to every storage unit the bridges provision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUnitTemplate {
    pub max_msgs: Option<u64>,
    pub max_bytes: Option<u64>,
    pub storage: StorageMedium,
    pub discard: DiscardPolicy,
    pub replicas: u8,
}

impl Default for StorageUnitTemplate {
    fn default() -> Self {
        Self {
            max_msgs: None,
            max_bytes: None,
            storage: StorageMedium::Memory,
            discard: DiscardPolicy::Old,
            replicas: 1,
        }
    }
}

impl StorageUnitTemplate {
    pub fn spec(&self, name: impl Into<String>, subjects: Vec<String>) -> StorageUnitSpec {
        StorageUnitSpec {
            max_msgs: self.max_msgs,
            max_bytes: self.max_bytes,
            storage: self.storage,
            discard: self.discard,
            replicas: self.replicas,
            ..StorageUnitSpec::new(name, subjects)
        }
    }
}

/// Delivery settings applied to every cursor the fetch bridge provisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorTemplate {
    pub deliver_policy: DeliverPolicy,
    pub ack_wait: Duration,
    pub max_deliver: Option<u32>,
}

impl Default for CursorTemplate {
    fn default() -> Self {
        Self {
            deliver_policy: DeliverPolicy::Last,
            ack_wait: DEFAULT_ACK_WAIT,
            max_deliver: None,
        }
    }
}

impl CursorTemplate {
    pub fn spec(&self, durable_name: impl Into<String>, filter_subject: &str) -> CursorSpec {
        CursorSpec {
            deliver_policy: self.deliver_policy,
            ack_wait: self.ack_wait,
            max_deliver: self.max_deliver,
            filter_subject: Some(filter_subject.to_string()),
            ..CursorSpec::new(durable_name)
        }
    }
}

pub struct ProvisioningCoordinator {
    broker: Arc<dyn BrokerClient>,
    /// Resources known to exist
    known: Cache<String, ()>,
}

impl ProvisioningCoordinator {
    pub fn new(broker: Arc<dyn BrokerClient>, ttl: Duration, capacity: u64) -> Self {
        let known = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { broker, known }
    }

    /// Ensure a storage unit exists. An existing unit is never redefined.
    pub async fn ensure_storage_unit(
        &self,
        spec: &StorageUnitSpec,
    ) -> Result<Provisioned, BrokerError> {
        let key = unit_key(&spec.name);
        if self.known.contains_key(&key) {
            return Ok(Provisioned::AlreadyExists);
        }

        match self.broker.create_storage_unit(spec).await {
            Ok(_) => {
                tracing::info!(
                    storage_unit = %spec.name,
                    subjects = ?spec.subjects,
                    "Created storage unit"
                );
                self.known.insert(key, ()).await;
                Ok(Provisioned::Created)
            }
            Err(BrokerError::AlreadyExists { .. }) => {
                tracing::debug!(storage_unit = %spec.name, "Storage unit already exists");
                self.known.insert(key, ()).await;
                Ok(Provisioned::AlreadyExists)
            }
            Err(e) => {
                tracing::warn!(storage_unit = %spec.name, error = %e, "Failed to create storage unit");
                Err(e)
            }
        }
    }

    /// Ensure a durable cursor exists on a storage unit
    pub async fn ensure_cursor(
        &self,
        storage_unit: &str,
        spec: &CursorSpec,
    ) -> Result<Provisioned, BrokerError> {
        let key = cursor_key(storage_unit, &spec.durable_name);
        if self.known.contains_key(&key) {
            return Ok(Provisioned::AlreadyExists);
        }

        match self.broker.create_cursor(storage_unit, spec).await {
            Ok(_) => {
                tracing::info!(
                    storage_unit,
                    cursor = %spec.durable_name,
                    deliver_policy = %spec.deliver_policy,
                    "Created cursor"
                );
                self.known.insert(key, ()).await;
                Ok(Provisioned::Created)
            }
            Err(BrokerError::AlreadyExists { .. }) => {
                tracing::debug!(storage_unit, cursor = %spec.durable_name, "Cursor already exists");
                self.known.insert(key, ()).await;
                Ok(Provisioned::AlreadyExists)
            }
            Err(e) => {
                tracing::warn!(
                    storage_unit,
                    cursor = %spec.durable_name,
                    error = %e,
                    "Failed to create cursor"
                );
                Err(e)
            }
        }
    }

    /// Drop a storage unit from memory after the broker reported it missing
    pub async fn forget_storage_unit(&self, name: &str) {
        self.known.invalidate(&unit_key(name)).await;
    }

    /// Drop a cursor from memory after the broker reported it missing
    pub async fn forget_cursor(&self, storage_unit: &str, durable_name: &str) {
        self.known
            .invalidate(&cursor_key(storage_unit, durable_name))
            .await;
    }
}

fn unit_key(name: &str) -> String {
    format!("unit:{name}")
}

fn cursor_key(storage_unit: &str, durable_name: &str) -> String {
    format!("cursor:{storage_unit}:{durable_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::CountingBroker;

    fn coordinator(broker: Arc<CountingBroker>) -> ProvisioningCoordinator {
        ProvisioningCoordinator::new(broker, Duration::from_secs(300), 1000)
    }

    #[tokio::test]
    async fn test_ensure_storage_unit_idempotent() {
        let broker = Arc::new(CountingBroker::new());
        let coordinator = coordinator(broker.clone());
        let spec = StorageUnitTemplate::default().spec("unit_orders", vec!["orders".into()]);

        assert_eq!(
            coordinator.ensure_storage_unit(&spec).await.unwrap(),
            Provisioned::Created
        );
        assert_eq!(
            coordinator.ensure_storage_unit(&spec).await.unwrap(),
            Provisioned::AlreadyExists
        );
        // Second call answered from memory
        assert_eq!(broker.create_unit_calls(), 1);
    }

    #[tokio::test]
    async fn test_already_exists_from_broker_is_success() {
        let broker = Arc::new(CountingBroker::new());
        let spec = StorageUnitSpec::new("unified_stream", vec!["*".into()]);
        broker.create_storage_unit(&spec).await.unwrap();

        // Fresh coordinator has no memory of the unit
        let coordinator = coordinator(broker.clone());
        assert_eq!(
            coordinator.ensure_storage_unit(&spec).await.unwrap(),
            Provisioned::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_other_errors_propagate_with_message() {
        let broker = Arc::new(CountingBroker::new());
        let coordinator = coordinator(broker.clone());
        let mut spec = StorageUnitSpec::new("unit_orders", vec!["orders".into()]);
        spec.replicas = 9;

        let err = coordinator.ensure_storage_unit(&spec).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfig(ref msg) if msg.contains("replicas")));

        let err = coordinator
            .ensure_cursor("missing", &CursorSpec::new("durable_x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_cursor_creates_once() {
        let broker = Arc::new(CountingBroker::new());
        broker
            .create_storage_unit(&StorageUnitSpec::new("unified_stream", vec!["*".into()]))
            .await
            .unwrap();
        let coordinator = Arc::new(coordinator(broker.clone()));
        let spec = CursorTemplate::default().spec("durable_orders", "orders");

        let calls = (0..16).map(|_| {
            let coordinator = coordinator.clone();
            let spec = spec.clone();
            tokio::spawn(async move { coordinator.ensure_cursor("unified_stream", &spec).await })
        });
        let outcomes: Vec<Provisioned> = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let created = outcomes
            .iter()
            .filter(|o| **o == Provisioned::Created)
            .count();
        assert_eq!(created, 1);
        assert_eq!(outcomes.len() - created, 15);
        assert_eq!(broker.created_cursors(), 1);
    }

    #[tokio::test]
    async fn test_forget_cursor_forces_broker_check() {
        let broker = Arc::new(CountingBroker::new());
        broker
            .create_storage_unit(&StorageUnitSpec::new("unified_stream", vec!["*".into()]))
            .await
            .unwrap();
        let coordinator = coordinator(broker.clone());
        let spec = CursorTemplate::default().spec("durable_orders", "orders");

        coordinator.ensure_cursor("unified_stream", &spec).await.unwrap();
        coordinator.ensure_cursor("unified_stream", &spec).await.unwrap();
        assert_eq!(broker.create_cursor_calls(), 1);

        coordinator.forget_cursor("unified_stream", "durable_orders").await;
        assert_eq!(
            coordinator.ensure_cursor("unified_stream", &spec).await.unwrap(),
            Provisioned::AlreadyExists
        );
        assert_eq!(broker.create_cursor_calls(), 2);
    }

    #[test]
    fn test_templates() {
        let template = StorageUnitTemplate {
            max_msgs: Some(10),
            discard: DiscardPolicy::New,
            ..Default::default()
        };
        let spec = template.spec("unit_orders", vec!["orders".into()]);
        assert_eq!(spec.name, "unit_orders");
        assert_eq!(spec.max_msgs, Some(10));
        assert_eq!(spec.discard, DiscardPolicy::New);
        assert_eq!(spec.replicas, 1);

        let cursor = CursorTemplate::default().spec("durable_orders", "orders");
        assert_eq!(cursor.deliver_policy, DeliverPolicy::Last);
        assert_eq!(cursor.filter_subject.as_deref(), Some("orders"));
        assert_eq!(cursor.max_deliver, None);
    }
}

//! In-memory broker
//!
//! Storage units are VecDeques of sequenced messages; cursors track the
//! highest sequence handed out plus a pending set awaiting acknowledgment.
//! Waiting pulls are woken through a per-unit Notify instead of polling.
//!
//! ## Limitations
//!
//! Suitable for local development and single-process deployments:
//! - Process exit = all messages lost, whatever the storage medium says
//! - Replicas are validated but not materialized
//!
//! For durability across restarts, use the Redis broker.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::backend::BrokerClient;
use super::error::{BrokerError, ResourceKind};
use super::spec::{
    BrokerMessage, CursorInfo, CursorSpec, DeliverPolicy, DiscardPolicy, PublishAck,
    StorageUnitInfo, StorageUnitSpec,
};
use super::subject;

/// Message stored in a storage unit
struct StoredMessage {
    seq: u64,
    subject: String,
    payload: Vec<u8>,
}

impl StoredMessage {
    fn to_delivery(&self, redelivered: bool) -> BrokerMessage {
        BrokerMessage {
            id: self.seq.to_string(),
            subject: self.subject.clone(),
            payload: self.payload.clone(),
            redelivered,
        }
    }
}

struct PendingDelivery {
    delivered_at: Instant,
    deliveries: u32,
}

struct CursorState {
    spec: CursorSpec,
    created: DateTime<Utc>,
    /// Highest sequence examined for first delivery
    delivered_seq: u64,
    /// Delivered, unacknowledged: seq -> delivery state
    pending: BTreeMap<u64, PendingDelivery>,
    waiting: u64,
}

impl CursorState {
    fn info(&self, storage_unit: &str) -> CursorInfo {
        CursorInfo {
            storage_unit: storage_unit.to_string(),
            spec: self.spec.clone(),
            pending: self.pending.len() as u64,
            waiting: self.waiting,
            created: self.created,
        }
    }
}

struct UnitState {
    spec: StorageUnitSpec,
    created: DateTime<Utc>,
    messages: VecDeque<StoredMessage>,
    bytes: u64,
    last_seq: u64,
    cursors: HashMap<String, CursorState>,
    notify: Arc<Notify>,
}

impl UnitState {
    fn new(spec: StorageUnitSpec) -> Self {
        Self {
            spec,
            created: Utc::now(),
            messages: VecDeque::new(),
            bytes: 0,
            last_seq: 0,
            cursors: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn info(&self) -> StorageUnitInfo {
        StorageUnitInfo {
            spec: self.spec.clone(),
            messages: self.messages.len() as u64,
            bytes: Some(self.bytes),
            created: self.created,
        }
    }

    /// Append a message, enforcing retention limits. Returns its sequence.
    fn append(&mut self, subject: &str, payload: &[u8]) -> Result<u64, BrokerError> {
        let size = payload.len() as u64;
        if let Some(max) = self.spec.max_bytes
            && size > max
        {
            return Err(BrokerError::LimitExceeded(format!(
                "message size {} exceeds max_bytes {} of storage unit '{}'",
                size, max, self.spec.name
            )));
        }

        if self.spec.discard == DiscardPolicy::New {
            if let Some(max) = self.spec.max_msgs
                && self.messages.len() as u64 >= max
            {
                return Err(BrokerError::LimitExceeded(format!(
                    "storage unit '{}' reached max_msgs {}",
                    self.spec.name, max
                )));
            }
            if let Some(max) = self.spec.max_bytes
                && self.bytes + size > max
            {
                return Err(BrokerError::LimitExceeded(format!(
                    "storage unit '{}' reached max_bytes {}",
                    self.spec.name, max
                )));
            }
        }

        self.last_seq += 1;
        self.messages.push_back(StoredMessage {
            seq: self.last_seq,
            subject: subject.to_string(),
            payload: payload.to_vec(),
        });
        self.bytes += size;

        while self.over_limits() {
            match self.messages.pop_front() {
                Some(old) => self.bytes -= old.payload.len() as u64,
                None => break,
            }
        }

        Ok(self.last_seq)
    }

    fn over_limits(&self) -> bool {
        self.spec
            .max_msgs
            .is_some_and(|max| self.messages.len() as u64 > max)
            || self.spec.max_bytes.is_some_and(|max| self.bytes > max)
    }

    /// Sequence a new cursor starts after
    fn start_seq(&self, spec: &CursorSpec) -> u64 {
        match spec.deliver_policy {
            DeliverPolicy::All => 0,
            DeliverPolicy::New => self.last_seq,
            DeliverPolicy::Last => self
                .messages
                .iter()
                .rev()
                .find(|m| spec.accepts(&m.subject))
                .map_or(self.last_seq, |m| m.seq - 1),
        }
    }
}

fn find_message(messages: &VecDeque<StoredMessage>, seq: u64) -> Option<&StoredMessage> {
    messages
        .binary_search_by_key(&seq, |m| m.seq)
        .ok()
        .map(|idx| &messages[idx])
}

/// Shared state for the memory broker
struct SharedState {
    units: RwLock<HashMap<String, UnitState>>,
    closed: AtomicBool,
}

/// Registration of a pull currently waiting on a cursor.
/// Dropping it releases the registration on every exit path.
struct WaitingPull {
    state: Arc<SharedState>,
    storage_unit: String,
    durable_name: String,
}

impl Drop for WaitingPull {
    fn drop(&mut self) {
        let mut units = self.state.units.write();
        if let Some(cursor) = units
            .get_mut(&self.storage_unit)
            .and_then(|unit| unit.cursors.get_mut(&self.durable_name))
        {
            cursor.waiting = cursor.waiting.saturating_sub(1);
        }
    }
}

/// In-memory broker
pub struct MemoryBroker {
    state: Arc<SharedState>,
}

impl Clone for MemoryBroker {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState {
                units: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    /// Take up to `max` deliverable messages from a cursor.
    /// Also returns when the earliest pending message becomes redeliverable.
    fn take_batch(
        &self,
        storage_unit: &str,
        durable_name: &str,
        max: usize,
    ) -> Result<(Vec<BrokerMessage>, Option<Instant>), BrokerError> {
        let mut units = self.state.units.write();
        let unit = units
            .get_mut(storage_unit)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::StorageUnit, storage_unit))?;
        let UnitState {
            messages, cursors, ..
        } = unit;
        let cursor = cursors
            .get_mut(durable_name)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Cursor, durable_name))?;

        let now = Instant::now();
        let ack_wait = cursor.spec.ack_wait;
        let max_deliver = cursor.spec.max_deliver;
        let mut batch = Vec::with_capacity(max);

        // Redeliveries first, lowest sequence first
        let expired: Vec<u64> = cursor
            .pending
            .iter()
            .filter(|(_, p)| now >= p.delivered_at + ack_wait)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired {
            if batch.len() >= max {
                break;
            }
            let exhausted = cursor
                .pending
                .get(&seq)
                .is_some_and(|p| max_deliver.is_some_and(|limit| p.deliveries >= limit));
            match find_message(messages, seq) {
                Some(message) if !exhausted => {
                    if let Some(pending) = cursor.pending.get_mut(&seq) {
                        pending.delivered_at = now;
                        pending.deliveries += 1;
                    }
                    batch.push(message.to_delivery(true));
                }
                // Out of attempts, or discarded by retention
                _ => {
                    cursor.pending.remove(&seq);
                }
            }
        }

        let start = messages.partition_point(|m| m.seq <= cursor.delivered_seq);
        for message in messages.range(start..) {
            if batch.len() >= max {
                break;
            }
            cursor.delivered_seq = message.seq;
            if cursor.spec.accepts(&message.subject) {
                cursor.pending.insert(
                    message.seq,
                    PendingDelivery {
                        delivered_at: now,
                        deliveries: 1,
                    },
                );
                batch.push(message.to_delivery(false));
            }
        }

        let next_redelivery = cursor
            .pending
            .values()
            .map(|p| p.delivered_at + ack_wait)
            .min();

        Ok((batch, next_redelivery))
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<PublishAck, BrokerError> {
        self.ensure_open()?;
        subject::validate_publish(subject)?;

        let (ack, notify) = {
            let mut units = self.state.units.write();
            let (name, unit) = units
                .iter_mut()
                .find(|(_, unit)| unit.spec.covers(subject))
                .ok_or_else(|| BrokerError::NoMatchingStorageUnit(subject.to_string()))?;
            let seq = unit.append(subject, payload)?;
            (
                PublishAck {
                    storage_unit: name.clone(),
                    id: seq.to_string(),
                },
                Arc::clone(&unit.notify),
            )
        };

        notify.notify_waiters();
        tracing::trace!(subject, storage_unit = %ack.storage_unit, id = %ack.id, "Stored message");
        Ok(ack)
    }

    async fn create_storage_unit(
        &self,
        spec: &StorageUnitSpec,
    ) -> Result<StorageUnitInfo, BrokerError> {
        self.ensure_open()?;
        spec.validate()?;

        let mut units = self.state.units.write();
        if units.contains_key(&spec.name) {
            return Err(BrokerError::already_exists(
                ResourceKind::StorageUnit,
                &spec.name,
            ));
        }
        for (other_name, other) in units.iter() {
            for theirs in &other.spec.subjects {
                if let Some(ours) = spec
                    .subjects
                    .iter()
                    .find(|ours| subject::overlaps(ours, theirs))
                {
                    return Err(BrokerError::InvalidConfig(format!(
                        "subject '{}' overlaps '{}' of storage unit '{}'",
                        ours, theirs, other_name
                    )));
                }
            }
        }

        let unit = UnitState::new(spec.clone());
        let info = unit.info();
        units.insert(spec.name.clone(), unit);
        Ok(info)
    }

    async fn storage_unit_info(&self, name: &str) -> Result<StorageUnitInfo, BrokerError> {
        self.ensure_open()?;
        self.state
            .units
            .read()
            .get(name)
            .map(UnitState::info)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::StorageUnit, name))
    }

    async fn find_storage_unit(&self, subject: &str) -> Result<Option<String>, BrokerError> {
        self.ensure_open()?;
        Ok(self
            .state
            .units
            .read()
            .iter()
            .find(|(_, unit)| unit.spec.covers(subject))
            .map(|(name, _)| name.clone()))
    }

    async fn create_cursor(
        &self,
        storage_unit: &str,
        spec: &CursorSpec,
    ) -> Result<CursorInfo, BrokerError> {
        self.ensure_open()?;
        spec.validate()?;

        let mut units = self.state.units.write();
        let unit = units
            .get_mut(storage_unit)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::StorageUnit, storage_unit))?;
        if unit.cursors.contains_key(&spec.durable_name) {
            return Err(BrokerError::already_exists(
                ResourceKind::Cursor,
                &spec.durable_name,
            ));
        }
        if let Some(filter) = &spec.filter_subject
            && !unit.spec.covers(filter)
        {
            return Err(BrokerError::InvalidConfig(format!(
                "filter subject '{}' is not covered by storage unit '{}'",
                filter, storage_unit
            )));
        }

        let cursor = CursorState {
            spec: spec.clone(),
            created: Utc::now(),
            delivered_seq: unit.start_seq(spec),
            pending: BTreeMap::new(),
            waiting: 0,
        };
        let info = cursor.info(storage_unit);
        unit.cursors.insert(spec.durable_name.clone(), cursor);
        Ok(info)
    }

    async fn cursor_info(
        &self,
        storage_unit: &str,
        durable_name: &str,
    ) -> Result<CursorInfo, BrokerError> {
        self.ensure_open()?;
        let units = self.state.units.read();
        let unit = units
            .get(storage_unit)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::StorageUnit, storage_unit))?;
        unit.cursors
            .get(durable_name)
            .map(|cursor| cursor.info(storage_unit))
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Cursor, durable_name))
    }

    async fn pull(
        &self,
        storage_unit: &str,
        durable_name: &str,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        self.ensure_open()?;
        if max_messages == 0 {
            return Err(BrokerError::InvalidConfig(
                "pull batch size must be at least 1".into(),
            ));
        }

        let deadline = Instant::now() + expires;
        let notify = {
            let mut units = self.state.units.write();
            let unit = units
                .get_mut(storage_unit)
                .ok_or_else(|| BrokerError::not_found(ResourceKind::StorageUnit, storage_unit))?;
            let cursor = unit
                .cursors
                .get_mut(durable_name)
                .ok_or_else(|| BrokerError::not_found(ResourceKind::Cursor, durable_name))?;
            cursor.waiting += 1;
            Arc::clone(&unit.notify)
        };
        let _waiting = WaitingPull {
            state: Arc::clone(&self.state),
            storage_unit: storage_unit.to_string(),
            durable_name: durable_name.to_string(),
        };

        loop {
            // Register interest before checking so a concurrent publish is not missed
            let notified = notify.notified();

            let (batch, next_redelivery) =
                self.take_batch(storage_unit, durable_name, max_messages)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if self.state.closed.load(Ordering::Acquire) || Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_redelivery.map_or(deadline, |at| at.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn ack(
        &self,
        storage_unit: &str,
        durable_name: &str,
        message_id: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let seq: u64 = message_id
            .parse()
            .map_err(|_| BrokerError::Operation(format!("invalid message id '{}'", message_id)))?;

        let mut units = self.state.units.write();
        let unit = units
            .get_mut(storage_unit)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::StorageUnit, storage_unit))?;
        let cursor = unit
            .cursors
            .get_mut(durable_name)
            .ok_or_else(|| BrokerError::not_found(ResourceKind::Cursor, durable_name))?;
        cursor.pending.remove(&seq);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::Release);
        let notifiers: Vec<Arc<Notify>> = self
            .state
            .units
            .read()
            .values()
            .map(|unit| Arc::clone(&unit.notify))
            .collect();
        for notify in notifiers {
            notify.notify_waiters();
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_WAIT: Duration = Duration::from_millis(1);

    async fn broker_with_unit(name: &str, subjects: &[&str]) -> MemoryBroker {
        let broker = MemoryBroker::new();
        let spec = StorageUnitSpec::new(name, subjects.iter().map(|s| s.to_string()).collect());
        broker.create_storage_unit(&spec).await.unwrap();
        broker
    }

    fn cursor(name: &str, filter: &str, policy: DeliverPolicy) -> CursorSpec {
        let mut spec = CursorSpec::new(name);
        spec.filter_subject = Some(filter.to_string());
        spec.deliver_policy = policy;
        spec
    }

    #[tokio::test]
    async fn test_publish_without_unit_is_rejected() {
        let broker = MemoryBroker::new();
        let err = broker.publish("orders.created", b"x").await.unwrap_err();
        assert!(matches!(err, BrokerError::NoMatchingStorageUnit(s) if s == "orders.created"));
    }

    #[tokio::test]
    async fn test_publish_routes_to_covering_unit() {
        let broker = broker_with_unit("unified_stream", &["*"]).await;
        broker
            .create_storage_unit(&StorageUnitSpec::new(
                "unit_orders_created",
                vec!["orders.created".into()],
            ))
            .await
            .unwrap();

        let ack = broker.publish("orders", b"a").await.unwrap();
        assert_eq!(ack.storage_unit, "unified_stream");
        let ack = broker.publish("orders.created", b"b").await.unwrap();
        assert_eq!(ack.storage_unit, "unit_orders_created");
        assert_eq!(ack.id, "1");

        assert!(broker.publish("orders.updated", b"c").await.is_err());
    }

    #[tokio::test]
    async fn test_create_storage_unit_already_exists() {
        let broker = broker_with_unit("orders", &["orders"]).await;

        // Same definition
        let err = broker
            .create_storage_unit(&StorageUnitSpec::new("orders", vec!["orders".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyExists { .. }));

        // Conflicting definition does not redefine
        let err = broker
            .create_storage_unit(&StorageUnitSpec::new("orders", vec!["other".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AlreadyExists { .. }));
        let info = broker.storage_unit_info("orders").await.unwrap();
        assert_eq!(info.spec.subjects, vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_overlapping_subjects_rejected() {
        let broker = broker_with_unit("unified_stream", &["*"]).await;
        let err = broker
            .create_storage_unit(&StorageUnitSpec::new("unit_orders", vec!["orders".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfig(msg) if msg.contains("unified_stream")));

        // Two-token subjects are outside "*"
        broker
            .create_storage_unit(&StorageUnitSpec::new(
                "unit_orders_created",
                vec!["orders.created".into()],
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_find_storage_unit() {
        let broker = broker_with_unit("unified_stream", &["*"]).await;
        assert_eq!(
            broker.find_storage_unit("orders").await.unwrap().as_deref(),
            Some("unified_stream")
        );
        assert_eq!(broker.find_storage_unit("orders.created").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pull_and_ack() {
        let broker = broker_with_unit("orders", &["orders.>"]).await;
        broker
            .create_cursor("orders", &cursor("durable_orders", "orders.>", DeliverPolicy::All))
            .await
            .unwrap();

        broker.publish("orders.created", b"first").await.unwrap();
        broker.publish("orders.created", b"second").await.unwrap();

        let batch = broker.pull("orders", "durable_orders", 1, NO_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"first");
        assert!(!batch[0].redelivered);
        broker.ack("orders", "durable_orders", &batch[0].id).await.unwrap();

        let batch = broker.pull("orders", "durable_orders", 10, NO_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"second");
        broker.ack("orders", "durable_orders", &batch[0].id).await.unwrap();

        let info = broker.cursor_info("orders", "durable_orders").await.unwrap();
        assert_eq!(info.pending, 0);
        assert!(broker.pull("orders", "durable_orders", 1, NO_WAIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_filter_skips_other_subjects() {
        let broker = broker_with_unit("unified_stream", &["*"]).await;
        broker
            .create_cursor(
                "unified_stream",
                &cursor("durable_orders", "orders", DeliverPolicy::All),
            )
            .await
            .unwrap();

        broker.publish("payments", b"p").await.unwrap();
        broker.publish("orders", b"o").await.unwrap();

        let batch = broker
            .pull("unified_stream", "durable_orders", 5, NO_WAIT)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].subject, "orders");
    }

    #[tokio::test]
    async fn test_filter_must_be_covered_by_unit() {
        let broker = broker_with_unit("orders", &["orders.*"]).await;
        let err = broker
            .create_cursor("orders", &cursor("durable_x", "payments", DeliverPolicy::All))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_deliver_policies() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        for payload in [b"1", b"2", b"3"] {
            broker.publish("orders", payload).await.unwrap();
        }

        for (name, policy) in [
            ("all", DeliverPolicy::All),
            ("last", DeliverPolicy::Last),
            ("new", DeliverPolicy::New),
        ] {
            broker
                .create_cursor("orders", &cursor(name, "orders", policy))
                .await
                .unwrap();
        }
        broker.publish("orders", b"4").await.unwrap();

        let payloads = |batch: Vec<BrokerMessage>| {
            batch.into_iter().map(|m| m.payload).collect::<Vec<_>>()
        };
        let all = broker.pull("orders", "all", 10, NO_WAIT).await.unwrap();
        assert_eq!(payloads(all), vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]);
        let last = broker.pull("orders", "last", 10, NO_WAIT).await.unwrap();
        assert_eq!(payloads(last), vec![b"3".to_vec(), b"4".to_vec()]);
        let new = broker.pull("orders", "new", 10, NO_WAIT).await.unwrap();
        assert_eq!(payloads(new), vec![b"4".to_vec()]);
    }

    #[tokio::test]
    async fn test_unacked_message_redelivered_after_ack_wait() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        let mut spec = cursor("durable_orders", "orders", DeliverPolicy::All);
        spec.ack_wait = Duration::from_millis(50);
        broker.create_cursor("orders", &spec).await.unwrap();
        broker.publish("orders", b"x").await.unwrap();

        let first = broker.pull("orders", "durable_orders", 1, NO_WAIT).await.unwrap();
        assert_eq!(first.len(), 1);

        // Not yet redeliverable
        assert!(broker.pull("orders", "durable_orders", 1, NO_WAIT).await.unwrap().is_empty());

        // The waiting pull wakes up when the ack wait elapses
        let again = broker
            .pull("orders", "durable_orders", 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, first[0].id);
        assert!(again[0].redelivered);
    }

    #[tokio::test]
    async fn test_max_deliver_stops_redelivery() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        let mut spec = cursor("durable_orders", "orders", DeliverPolicy::All);
        spec.ack_wait = Duration::from_millis(20);
        spec.max_deliver = Some(1);
        broker.create_cursor("orders", &spec).await.unwrap();
        broker.publish("orders", b"x").await.unwrap();

        assert_eq!(broker.pull("orders", "durable_orders", 1, NO_WAIT).await.unwrap().len(), 1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(broker.pull("orders", "durable_orders", 1, NO_WAIT).await.unwrap().is_empty());
        let info = broker.cursor_info("orders", "durable_orders").await.unwrap();
        assert_eq!(info.pending, 0);
    }

    #[tokio::test]
    async fn test_pull_waits_for_publish() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        broker
            .create_cursor("orders", &cursor("durable_orders", "orders", DeliverPolicy::New))
            .await
            .unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish("orders", b"late").await.unwrap();
        });

        let batch = broker
            .pull("orders", "durable_orders", 1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"late");
    }

    #[tokio::test]
    async fn test_empty_pull_returns_within_expiry() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        broker
            .create_cursor("orders", &cursor("durable_orders", "orders", DeliverPolicy::Last))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let batch = broker
            .pull("orders", "durable_orders", 1, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waiting_pull_released_on_every_exit() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        broker
            .create_cursor("orders", &cursor("durable_orders", "orders", DeliverPolicy::All))
            .await
            .unwrap();

        let waiter = broker.clone();
        let handle = tokio::spawn(async move {
            waiter
                .pull("orders", "durable_orders", 1, Duration::from_secs(30))
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let info = broker.cursor_info("orders", "durable_orders").await.unwrap();
        assert_eq!(info.waiting, 1);

        // Caller gives up: registration is dropped with the future
        handle.abort();
        let _ = handle.await;
        let info = broker.cursor_info("orders", "durable_orders").await.unwrap();
        assert_eq!(info.waiting, 0);

        // Expiry path
        broker
            .pull("orders", "durable_orders", 1, NO_WAIT)
            .await
            .unwrap();
        let info = broker.cursor_info("orders", "durable_orders").await.unwrap();
        assert_eq!(info.waiting, 0);
    }

    #[tokio::test]
    async fn test_concurrent_pulls_never_share_a_message() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        broker
            .create_cursor("orders", &cursor("durable_orders", "orders", DeliverPolicy::All))
            .await
            .unwrap();
        for i in 0..20u8 {
            broker.publish("orders", &[i]).await.unwrap();
        }

        let pulls = (0..20).map(|_| {
            let broker = broker.clone();
            async move {
                broker
                    .pull("orders", "durable_orders", 1, Duration::from_millis(200))
                    .await
                    .unwrap()
            }
        });
        let mut ids: Vec<String> = futures::future::join_all(pulls)
            .await
            .into_iter()
            .flatten()
            .map(|m| m.id)
            .collect();
        ids.sort();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, 20);
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_retention_discard_old() {
        let broker = MemoryBroker::new();
        let mut spec = StorageUnitSpec::new("orders", vec!["orders".into()]);
        spec.max_msgs = Some(2);
        broker.create_storage_unit(&spec).await.unwrap();
        for payload in [b"1", b"2", b"3"] {
            broker.publish("orders", payload).await.unwrap();
        }

        let info = broker.storage_unit_info("orders").await.unwrap();
        assert_eq!(info.messages, 2);
        assert_eq!(info.bytes, Some(2));

        broker
            .create_cursor("orders", &cursor("all", "orders", DeliverPolicy::All))
            .await
            .unwrap();
        let batch = broker.pull("orders", "all", 10, NO_WAIT).await.unwrap();
        assert_eq!(batch[0].payload, b"2");
    }

    #[tokio::test]
    async fn test_retention_discard_new() {
        let broker = MemoryBroker::new();
        let mut spec = StorageUnitSpec::new("orders", vec!["orders".into()]);
        spec.max_bytes = Some(4);
        spec.discard = DiscardPolicy::New;
        broker.create_storage_unit(&spec).await.unwrap();

        broker.publish("orders", b"abc").await.unwrap();
        let err = broker.publish("orders", b"de").await.unwrap_err();
        assert!(matches!(err, BrokerError::LimitExceeded(_)));
        let err = broker.publish("orders", b"too large").await.unwrap_err();
        assert!(matches!(err, BrokerError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_missing_resources() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        let err = broker.pull("missing", "c", 1, NO_WAIT).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { kind: ResourceKind::StorageUnit, .. }));
        let err = broker.pull("orders", "c", 1, NO_WAIT).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { kind: ResourceKind::Cursor, .. }));
        let err = broker.ack("orders", "c", "1").await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { .. }));
        let err = broker
            .create_cursor("missing", &CursorSpec::new("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_close_releases_waiting_pulls() {
        let broker = broker_with_unit("orders", &["orders"]).await;
        broker
            .create_cursor("orders", &cursor("durable_orders", "orders", DeliverPolicy::New))
            .await
            .unwrap();

        let waiter = broker.clone();
        let handle = tokio::spawn(async move {
            waiter
                .pull("orders", "durable_orders", 1, Duration::from_secs(30))
                .await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.close().await;

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pull should return after close")
            .unwrap();
        assert!(result.unwrap().is_empty());
        assert!(matches!(broker.health_check().await, Err(BrokerError::Closed)));
        assert!(matches!(
            broker.publish("orders", b"x").await,
            Err(BrokerError::Closed)
        ));
    }
}

//! Broker resource definitions
//!
//! - Storage unit: named append-only store covering one or more subject filters
//! - Cursor: named durable read position into a storage unit, advanced on ack

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::BrokerError;
use super::subject;

/// Default time a delivered message may stay unacknowledged before redelivery
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// Upper bound for storage unit replication
pub const MAX_REPLICAS: u8 = 5;

// =============================================================================
// Policies
// =============================================================================

/// Storage medium of a storage unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMedium {
    #[default]
    Memory,
    File,
}

impl fmt::Display for StorageMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMedium::Memory => write!(f, "memory"),
            StorageMedium::File => write!(f, "file"),
        }
    }
}

/// What happens when a storage unit reaches one of its limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Drop the oldest messages to make room
    #[default]
    Old,
    /// Reject new messages
    New,
}

impl fmt::Display for DiscardPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardPolicy::Old => write!(f, "old"),
            DiscardPolicy::New => write!(f, "new"),
        }
    }
}

/// Retention policy of a storage unit. Only limit-bounded retention is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    #[default]
    Limits,
}

/// Starting position of a newly created cursor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverPolicy {
    /// Every stored message
    All,
    /// The last stored message matching the filter, then everything after it
    #[default]
    Last,
    /// Only messages stored after the cursor was created
    New,
}

impl fmt::Display for DeliverPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliverPolicy::All => write!(f, "all"),
            DeliverPolicy::Last => write!(f, "last"),
            DeliverPolicy::New => write!(f, "new"),
        }
    }
}

/// Acknowledgment mode of a cursor. Only explicit acknowledgment is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    #[default]
    Explicit,
}

// =============================================================================
// Specs
// =============================================================================

/// Definition of a storage unit
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageUnitSpec {
    pub name: String,
    pub subjects: Vec<String>,
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// Maximum stored messages (None = unlimited)
    pub max_msgs: Option<u64>,
    /// Maximum stored payload bytes (None = unlimited)
    pub max_bytes: Option<u64>,
    #[serde(default)]
    pub storage: StorageMedium,
    #[serde(default)]
    pub discard: DiscardPolicy,
    pub replicas: u8,
}

impl StorageUnitSpec {
    /// Unlimited, volatile, discard-oldest, single replica
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            retention: RetentionPolicy::Limits,
            max_msgs: None,
            max_bytes: None,
            storage: StorageMedium::Memory,
            discard: DiscardPolicy::Old,
            replicas: 1,
        }
    }

    /// True if one of the unit's subject filters covers `subject`
    pub fn covers(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| subject::covers(s, subject))
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if !subject::is_valid_name(&self.name) {
            return Err(BrokerError::InvalidConfig(format!(
                "invalid storage unit name '{}'",
                self.name
            )));
        }
        if self.subjects.is_empty() {
            return Err(BrokerError::InvalidConfig(format!(
                "storage unit '{}' needs at least one subject",
                self.name
            )));
        }
        for s in &self.subjects {
            subject::validate_filter(s)?;
        }
        if self.max_msgs == Some(0) {
            return Err(BrokerError::InvalidConfig(
                "max_msgs must be greater than 0 (omit for unlimited)".into(),
            ));
        }
        if self.max_bytes == Some(0) {
            return Err(BrokerError::InvalidConfig(
                "max_bytes must be greater than 0 (omit for unlimited)".into(),
            ));
        }
        if self.replicas == 0 || self.replicas > MAX_REPLICAS {
            return Err(BrokerError::InvalidConfig(format!(
                "replicas must be between 1 and {}, got {}",
                MAX_REPLICAS, self.replicas
            )));
        }
        Ok(())
    }
}

/// Definition of a durable cursor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CursorSpec {
    pub durable_name: String,
    #[serde(default)]
    pub ack_policy: AckPolicy,
    #[serde(default)]
    pub deliver_policy: DeliverPolicy,
    /// Maximum delivery attempts per message (None = unbounded)
    pub max_deliver: Option<u32>,
    pub ack_wait: Duration,
    pub filter_subject: Option<String>,
}

impl CursorSpec {
    pub fn new(durable_name: impl Into<String>) -> Self {
        Self {
            durable_name: durable_name.into(),
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::default(),
            max_deliver: None,
            ack_wait: DEFAULT_ACK_WAIT,
            filter_subject: None,
        }
    }

    /// True if a message published on `subject` is visible through this cursor
    pub fn accepts(&self, subject: &str) -> bool {
        self.filter_subject
            .as_deref()
            .is_none_or(|filter| subject::covers(filter, subject))
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if !subject::is_valid_name(&self.durable_name) {
            return Err(BrokerError::InvalidConfig(format!(
                "invalid durable name '{}'",
                self.durable_name
            )));
        }
        if let Some(filter) = &self.filter_subject {
            subject::validate_filter(filter)?;
        }
        if self.max_deliver == Some(0) {
            return Err(BrokerError::InvalidConfig(
                "max_deliver must be greater than 0 (omit for unbounded)".into(),
            ));
        }
        if self.ack_wait.is_zero() {
            return Err(BrokerError::InvalidConfig(
                "ack_wait must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Broker responses
// =============================================================================

/// Message delivered by a pull
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// Broker message ID, used for acknowledgment
    pub id: String,
    /// Subject the message was published on
    pub subject: String,
    pub payload: Vec<u8>,
    /// True if this message was delivered before without being acknowledged
    pub redelivered: bool,
}

/// Receipt for a stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub storage_unit: String,
    pub id: String,
}

/// Current state of a storage unit
#[derive(Debug, Clone)]
pub struct StorageUnitInfo {
    pub spec: StorageUnitSpec,
    pub messages: u64,
    /// Stored payload bytes, if the backend tracks them
    pub bytes: Option<u64>,
    pub created: DateTime<Utc>,
}

/// Current state of a cursor
#[derive(Debug, Clone)]
pub struct CursorInfo {
    pub storage_unit: String,
    pub spec: CursorSpec,
    /// Delivered but not yet acknowledged
    pub pending: u64,
    /// Pull requests currently waiting for messages
    pub waiting: u64,
    pub created: DateTime<Utc>,
}

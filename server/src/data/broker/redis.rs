//! Redis broker using Streams and consumer groups
//!
//! ## Mapping
//!
//! - Storage unit: one Redis stream per unit, entries carry `subject` and
//!   `payload` fields. `max_msgs` maps to exact `MAXLEN` trimming.
//! - Cursor: one consumer group per durable name on the unit's stream.
//!   The stored definition is written first (`HSETNX`) and decides who
//!   created the cursor; a pull recreates a missing group from it.
//!   Pulls claim idle pending entries first (`XAUTOCLAIM`, ack wait
//!   redelivery), then read new entries (`XREADGROUP ... BLOCK`). Entries
//!   outside the cursor's filter are acknowledged in that group and skipped.
//! - Definitions: unit specs in the `{streamgate}:units` hash (`HSETNX`),
//!   cursor specs in `{streamgate}:cursors:<unit>`.
//!
//! ## Limitations
//!
//! - `max_bytes` is accepted but not enforced
//! - `max_deliver` must be unbounded (Redis does not cap deliveries)
//! - Storage medium and replicas follow the Redis deployment, not the unit definition

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::{RedisError, RedisResult, Value as RedisValue, cmd};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::backend::BrokerClient;
use super::error::{BrokerError, ResourceKind};
use super::spec::{
    BrokerMessage, CursorInfo, CursorSpec, DeliverPolicy, DiscardPolicy, PublishAck,
    StorageUnitInfo, StorageUnitSpec,
};
use super::subject;
use crate::utils::url::redact_url;

/// Key prefix (hash tag keeps every key on one Redis Cluster slot)
const KEY_PREFIX: &str = "{streamgate}";

/// Consumer name used inside every group; cursors are shared, not per-process
const CONSUMER_NAME: &str = "streamgate";

const SUBJECT_FIELD: &str = "subject";
const PAYLOAD_FIELD: &str = "payload";

/// Entries scanned backwards when positioning a "last" cursor
const LAST_SCAN_COUNT: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
struct StoredUnit {
    spec: StorageUnitSpec,
    created: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCursor {
    spec: CursorSpec,
    created: DateTime<Utc>,
}

/// Stream entry as read from Redis
#[derive(Debug, PartialEq)]
struct StreamEntry {
    id: String,
    subject: String,
    payload: Vec<u8>,
}

impl StreamEntry {
    fn into_message(self, redelivered: bool) -> BrokerMessage {
        BrokerMessage {
            id: self.id,
            subject: self.subject,
            payload: self.payload,
            redelivered,
        }
    }
}

/// Redis broker
pub struct RedisBroker {
    pool: Pool,
}

impl RedisBroker {
    /// Connect and validate with PING
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let redacted = redact_url(redis_url);

        let mut config = Config::from_url(redis_url);
        config.pool = Some(deadpool_redis::PoolConfig {
            max_size: 32,
            timeouts: deadpool_redis::Timeouts {
                wait: Some(Duration::from_secs(5)),
                create: Some(Duration::from_secs(5)),
                recycle: Some(Duration::from_secs(5)),
            },
            ..Default::default()
        });

        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            BrokerError::Connection(format!("Failed to create Redis pool for {redacted}: {e}"))
        })?;

        let mut conn = pool.get().await.map_err(|e| {
            BrokerError::Connection(format!("Failed to connect to Redis at {redacted}: {e}"))
        })?;
        cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| BrokerError::Connection(format!("Redis PING failed for {redacted}: {e}")))?;

        tracing::debug!(url = %redacted, "Redis broker connected");
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, BrokerError> {
        if self.pool.is_closed() {
            return Err(BrokerError::Closed);
        }
        Ok(self.pool.get().await?)
    }

    async fn load_units(&self, conn: &mut Connection) -> Result<Vec<StoredUnit>, BrokerError> {
        let raw: HashMap<String, String> = cmd("HGETALL")
            .arg(units_key())
            .query_async(conn)
            .await?;
        raw.values().map(|json| decode_json(json)).collect()
    }

    async fn load_unit(&self, conn: &mut Connection, name: &str) -> Result<StoredUnit, BrokerError> {
        let raw: Option<String> = cmd("HGET")
            .arg(units_key())
            .arg(name)
            .query_async(conn)
            .await?;
        match raw {
            Some(json) => decode_json(&json),
            None => Err(BrokerError::not_found(ResourceKind::StorageUnit, name)),
        }
    }

    async fn load_cursor(
        &self,
        conn: &mut Connection,
        storage_unit: &str,
        durable_name: &str,
    ) -> Result<StoredCursor, BrokerError> {
        let raw: Option<String> = cmd("HGET")
            .arg(cursors_key(storage_unit))
            .arg(durable_name)
            .query_async(conn)
            .await?;
        match raw {
            Some(json) => decode_json(&json),
            None => Err(BrokerError::not_found(ResourceKind::Cursor, durable_name)),
        }
    }

    /// Group start ID for a "last" cursor: just before the newest matching entry
    async fn last_start_id(
        &self,
        conn: &mut Connection,
        key: &str,
        spec: &CursorSpec,
    ) -> Result<String, BrokerError> {
        let value: RedisValue = cmd("XREVRANGE")
            .arg(key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(LAST_SCAN_COUNT)
            .query_async(conn)
            .await?;
        let RedisValue::Array(entries) = value else {
            return Ok("$".to_string());
        };
        match parse_entries(&entries)
            .into_iter()
            .find(|entry| spec.accepts(&entry.subject))
        {
            Some(entry) => previous_stream_id(&entry.id),
            None => Ok("$".to_string()),
        }
    }

    /// Create the consumer group backing a cursor; an existing group is kept
    async fn create_group(
        &self,
        conn: &mut Connection,
        storage_unit: &str,
        spec: &CursorSpec,
    ) -> Result<(), BrokerError> {
        let key = stream_key(storage_unit);
        let start_id = match spec.deliver_policy {
            DeliverPolicy::All => "0".to_string(),
            DeliverPolicy::New => "$".to_string(),
            DeliverPolicy::Last => self.last_start_id(conn, &key, spec).await?,
        };

        let result: RedisResult<String> = cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(&spec.durable_name)
            .arg(&start_id)
            .arg("MKSTREAM")
            .query_async(conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_busy_group(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim entries idle past the ack wait
    /// Reply: [next_id, [[id, [field, value, ...]], ...], [deleted_id, ...]]
    async fn autoclaim(
        &self,
        conn: &mut Connection,
        key: &str,
        durable_name: &str,
        ack_wait: Duration,
        count: usize,
    ) -> RedisResult<RedisValue> {
        cmd("XAUTOCLAIM")
            .arg(key)
            .arg(durable_name)
            .arg(CONSUMER_NAME)
            .arg(ack_wait.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(conn)
            .await
    }

    /// Acknowledge entries a cursor's filter rejects so they never come back
    async fn skip_entries(
        &self,
        conn: &mut Connection,
        key: &str,
        durable_name: &str,
        ids: &[String],
    ) -> Result<(), BrokerError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut xack = cmd("XACK");
        xack.arg(key).arg(durable_name);
        for id in ids {
            xack.arg(id);
        }
        xack.query_async::<i64>(conn)
            .await
            .map_err(|e| group_error(e, durable_name))?;
        Ok(())
    }

    /// Skip filtered entries. A failure is only an error when nothing was
    /// delivered; otherwise the delivered messages take precedence.
    async fn skip_or_warn(
        &self,
        conn: &mut Connection,
        key: &str,
        durable_name: &str,
        ids: &[String],
        nothing_delivered: bool,
    ) -> Result<(), BrokerError> {
        match self.skip_entries(conn, key, durable_name, ids).await {
            Err(e) if nothing_delivered => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, cursor = durable_name, "Failed to skip filtered entries");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

#[async_trait]
impl BrokerClient for RedisBroker {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<PublishAck, BrokerError> {
        subject::validate_publish(subject)?;
        let mut conn = self.conn().await?;

        let unit = self
            .load_units(&mut conn)
            .await?
            .into_iter()
            .find(|unit| unit.spec.covers(subject))
            .ok_or_else(|| BrokerError::NoMatchingStorageUnit(subject.to_string()))?;
        let key = stream_key(&unit.spec.name);

        if unit.spec.discard == DiscardPolicy::New
            && let Some(max) = unit.spec.max_msgs
        {
            let len: u64 = cmd("XLEN").arg(&key).query_async(&mut conn).await?;
            if len >= max {
                return Err(BrokerError::LimitExceeded(format!(
                    "storage unit '{}' reached max_msgs {}",
                    unit.spec.name, max
                )));
            }
        }

        let mut xadd = cmd("XADD");
        xadd.arg(&key);
        if unit.spec.discard == DiscardPolicy::Old
            && let Some(max) = unit.spec.max_msgs
        {
            xadd.arg("MAXLEN").arg(max);
        }
        xadd.arg("*")
            .arg(SUBJECT_FIELD)
            .arg(subject)
            .arg(PAYLOAD_FIELD)
            .arg(payload);
        let id: String = xadd.query_async(&mut conn).await?;

        Ok(PublishAck {
            storage_unit: unit.spec.name,
            id,
        })
    }

    async fn create_storage_unit(
        &self,
        spec: &StorageUnitSpec,
    ) -> Result<StorageUnitInfo, BrokerError> {
        spec.validate()?;
        if spec.max_bytes.is_some() {
            tracing::warn!(storage_unit = %spec.name, "max_bytes is not enforced by the Redis broker");
        }

        let mut conn = self.conn().await?;
        let existing = self.load_units(&mut conn).await?;
        if existing.iter().any(|unit| unit.spec.name == spec.name) {
            return Err(BrokerError::already_exists(
                ResourceKind::StorageUnit,
                &spec.name,
            ));
        }
        for other in &existing {
            for theirs in &other.spec.subjects {
                if let Some(ours) = spec
                    .subjects
                    .iter()
                    .find(|ours| subject::overlaps(ours, theirs))
                {
                    return Err(BrokerError::InvalidConfig(format!(
                        "subject '{}' overlaps '{}' of storage unit '{}'",
                        ours, theirs, other.spec.name
                    )));
                }
            }
        }

        let stored = StoredUnit {
            spec: spec.clone(),
            created: Utc::now(),
        };
        let inserted: bool = cmd("HSETNX")
            .arg(units_key())
            .arg(&spec.name)
            .arg(encode_json(&stored)?)
            .query_async(&mut conn)
            .await?;
        if !inserted {
            return Err(BrokerError::already_exists(
                ResourceKind::StorageUnit,
                &spec.name,
            ));
        }

        Ok(StorageUnitInfo {
            spec: stored.spec,
            messages: 0,
            bytes: None,
            created: stored.created,
        })
    }

    async fn storage_unit_info(&self, name: &str) -> Result<StorageUnitInfo, BrokerError> {
        let mut conn = self.conn().await?;
        let stored = self.load_unit(&mut conn, name).await?;
        let messages: u64 = cmd("XLEN")
            .arg(stream_key(name))
            .query_async(&mut conn)
            .await?;
        Ok(StorageUnitInfo {
            spec: stored.spec,
            messages,
            bytes: None,
            created: stored.created,
        })
    }

    async fn find_storage_unit(&self, subject: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.conn().await?;
        Ok(self
            .load_units(&mut conn)
            .await?
            .into_iter()
            .find(|unit| unit.spec.covers(subject))
            .map(|unit| unit.spec.name))
    }

    async fn create_cursor(
        &self,
        storage_unit: &str,
        spec: &CursorSpec,
    ) -> Result<CursorInfo, BrokerError> {
        spec.validate()?;
        if spec.max_deliver.is_some() {
            return Err(BrokerError::InvalidConfig(
                "max_deliver must be unbounded for the Redis broker".into(),
            ));
        }

        let mut conn = self.conn().await?;
        let unit = self.load_unit(&mut conn, storage_unit).await?;
        if let Some(filter) = &spec.filter_subject
            && !unit.spec.covers(filter)
        {
            return Err(BrokerError::InvalidConfig(format!(
                "filter subject '{}' is not covered by storage unit '{}'",
                filter, storage_unit
            )));
        }

        // The stored definition arbitrates concurrent creation
        let stored = StoredCursor {
            spec: spec.clone(),
            created: Utc::now(),
        };
        let inserted: bool = cmd("HSETNX")
            .arg(cursors_key(storage_unit))
            .arg(&spec.durable_name)
            .arg(encode_json(&stored)?)
            .query_async(&mut conn)
            .await?;
        if !inserted {
            return Err(BrokerError::already_exists(
                ResourceKind::Cursor,
                &spec.durable_name,
            ));
        }

        if let Err(e) = self.create_group(&mut conn, storage_unit, spec).await {
            let removed = cmd("HDEL")
                .arg(cursors_key(storage_unit))
                .arg(&spec.durable_name)
                .query_async::<i64>(&mut conn)
                .await;
            if let Err(del_err) = removed {
                tracing::warn!(
                    cursor = %spec.durable_name,
                    error = %del_err,
                    "Failed to remove cursor definition after group creation failed"
                );
            }
            return Err(e);
        }

        Ok(CursorInfo {
            storage_unit: storage_unit.to_string(),
            spec: stored.spec,
            pending: 0,
            waiting: 0,
            created: stored.created,
        })
    }

    async fn cursor_info(
        &self,
        storage_unit: &str,
        durable_name: &str,
    ) -> Result<CursorInfo, BrokerError> {
        let mut conn = self.conn().await?;
        let stored = self.load_cursor(&mut conn, storage_unit, durable_name).await?;

        // [pending_count, smallest_id, largest_id, [[consumer, count], ...]]
        let summary: RedisValue = cmd("XPENDING")
            .arg(stream_key(storage_unit))
            .arg(durable_name)
            .query_async(&mut conn)
            .await
            .map_err(|e| group_error(e, durable_name))?;
        let pending = match summary {
            RedisValue::Array(parts) => match parts.first() {
                Some(RedisValue::Int(count)) => *count as u64,
                _ => 0,
            },
            _ => 0,
        };

        Ok(CursorInfo {
            storage_unit: storage_unit.to_string(),
            spec: stored.spec,
            pending,
            waiting: 0,
            created: stored.created,
        })
    }

    async fn pull(
        &self,
        storage_unit: &str,
        durable_name: &str,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<BrokerMessage>, BrokerError> {
        if max_messages == 0 {
            return Err(BrokerError::InvalidConfig(
                "pull batch size must be at least 1".into(),
            ));
        }

        let deadline = Instant::now() + expires;
        let mut conn = self.conn().await?;
        let cursor = self
            .load_cursor(&mut conn, storage_unit, durable_name)
            .await?;
        let key = stream_key(storage_unit);
        let mut batch = Vec::with_capacity(max_messages);

        // Entries idle past the ack wait are redelivered first
        let claimed = match self
            .autoclaim(&mut conn, &key, durable_name, cursor.spec.ack_wait, max_messages)
            .await
        {
            Ok(value) => value,
            Err(e) if is_missing_group(&e) => {
                // Definition stored but the group is not there yet
                tracing::debug!(cursor = durable_name, "Creating missing consumer group");
                self.create_group(&mut conn, storage_unit, &cursor.spec)
                    .await?;
                self.autoclaim(&mut conn, &key, durable_name, cursor.spec.ack_wait, max_messages)
                    .await
                    .map_err(|e| group_error(e, durable_name))?
            }
            Err(e) => return Err(group_error(e, durable_name)),
        };
        if let RedisValue::Array(parts) = claimed
            && let Some(RedisValue::Array(entries)) = parts.get(1)
        {
            let (accepted, skipped) = split_by_filter(parse_entries(entries), &cursor.spec);
            batch.extend(accepted.into_iter().map(|entry| entry.into_message(true)));
            self.skip_or_warn(&mut conn, &key, durable_name, &skipped, batch.is_empty())
                .await?;
        }
        if !batch.is_empty() {
            return Ok(batch);
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(batch);
            }

            // Reply: [[stream_key, [[id, [field, value, ...]], ...]]] or nil on timeout
            let value: RedisValue = cmd("XREADGROUP")
                .arg("GROUP")
                .arg(durable_name)
                .arg(CONSUMER_NAME)
                .arg("COUNT")
                .arg(max_messages)
                .arg("BLOCK")
                .arg(remaining.as_millis().max(1) as u64)
                .arg("STREAMS")
                .arg(&key)
                .arg(">")
                .query_async(&mut conn)
                .await
                .map_err(|e| group_error(e, durable_name))?;

            let RedisValue::Array(streams) = value else {
                return Ok(batch);
            };
            let mut skipped = Vec::new();
            for stream in &streams {
                if let RedisValue::Array(parts) = stream
                    && let Some(RedisValue::Array(entries)) = parts.get(1)
                {
                    let (accepted, rejected) =
                        split_by_filter(parse_entries(entries), &cursor.spec);
                    batch.extend(accepted.into_iter().map(|entry| entry.into_message(false)));
                    skipped.extend(rejected);
                }
            }

            self.skip_or_warn(&mut conn, &key, durable_name, &skipped, batch.is_empty())
                .await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }

    async fn ack(
        &self,
        storage_unit: &str,
        durable_name: &str,
        message_id: &str,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        cmd("XACK")
            .arg(stream_key(storage_unit))
            .arg(durable_name)
            .arg(message_id)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| group_error(e, durable_name))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let mut conn = self.conn().await?;
        cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn units_key() -> String {
    format!("{KEY_PREFIX}:units")
}

fn cursors_key(storage_unit: &str) -> String {
    format!("{KEY_PREFIX}:cursors:{storage_unit}")
}

fn stream_key(storage_unit: &str) -> String {
    format!("{KEY_PREFIX}:unit:{storage_unit}")
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, BrokerError> {
    serde_json::to_string(value).map_err(|e| BrokerError::Protocol(e.to_string()))
}

fn decode_json<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T, BrokerError> {
    serde_json::from_str(json).map_err(|e| BrokerError::Protocol(e.to_string()))
}

/// Missing consumer group means the cursor does not exist
fn is_missing_group(err: &RedisError) -> bool {
    err.to_string().contains("NOGROUP")
}

fn is_busy_group(err: &RedisError) -> bool {
    err.to_string().contains("BUSYGROUP")
}

fn group_error(err: RedisError, durable_name: &str) -> BrokerError {
    if is_missing_group(&err) {
        BrokerError::not_found(ResourceKind::Cursor, durable_name)
    } else {
        err.into()
    }
}

/// Split entries into those the cursor accepts and the ids it skips
fn split_by_filter(entries: Vec<StreamEntry>, spec: &CursorSpec) -> (Vec<StreamEntry>, Vec<String>) {
    let mut accepted = Vec::new();
    let mut skipped = Vec::new();
    for entry in entries {
        if spec.accepts(&entry.subject) {
            accepted.push(entry);
        } else {
            skipped.push(entry.id);
        }
    }
    (accepted, skipped)
}

/// Parse `[[id, [field, value, ...]], ...]` stream entries.
/// Entries deleted from the stream come back with nil fields and are dropped.
fn parse_entries(entries: &[RedisValue]) -> Vec<StreamEntry> {
    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        if let RedisValue::Array(parts) = entry
            && parts.len() >= 2
            && let (RedisValue::BulkString(id_bytes), RedisValue::Array(fields)) =
                (&parts[0], &parts[1])
            && let Ok(id) = String::from_utf8(id_bytes.clone())
            && let Some((subject, payload)) = extract_fields(fields)
        {
            parsed.push(StreamEntry {
                id,
                subject,
                payload,
            });
        }
    }
    parsed
}

/// Extract subject and payload from `[field1, value1, field2, value2, ...]`
fn extract_fields(fields: &[RedisValue]) -> Option<(String, Vec<u8>)> {
    let mut subject = None;
    let mut payload = None;
    for pair in fields.chunks_exact(2) {
        if let (RedisValue::BulkString(name), RedisValue::BulkString(value)) = (&pair[0], &pair[1])
        {
            if name == SUBJECT_FIELD.as_bytes() {
                subject = String::from_utf8(value.clone()).ok();
            } else if name == PAYLOAD_FIELD.as_bytes() {
                payload = Some(value.clone());
            }
        }
    }
    Some((subject?, payload?))
}

/// Stream ID immediately before `id` (`<ms>-<seq>`)
fn previous_stream_id(id: &str) -> Result<String, BrokerError> {
    let (ms, seq) = id
        .split_once('-')
        .and_then(|(ms, seq)| Some((ms.parse::<u64>().ok()?, seq.parse::<u64>().ok()?)))
        .ok_or_else(|| BrokerError::Protocol(format!("invalid stream id '{}'", id)))?;
    Ok(match (ms, seq) {
        (0, 0) => "0".to_string(),
        (ms, 0) => format!("{}-{}", ms - 1, u64::MAX),
        (ms, seq) => format!("{}-{}", ms, seq - 1),
    })
}

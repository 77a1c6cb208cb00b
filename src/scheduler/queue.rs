//! Redis Streams job queue with consumer-group semantics.
//!
//! This module provides the durable, at-least-once queue the worker consumes:
//!
//! - Append with XADD, one `data` field holding the JSON descriptor
//! - Group reads with XREADGROUP, tracked in the group's pending-entry list
//! - Acknowledgement with XACK
//! - Reclaiming of entries idle past the liveness timeout (XPENDING + XCLAIM)
//! - Dead letter stream for poison entries
//!
//! # Stream Structure
//!
//! - `{stream}`: Main stream where descriptors are appended
//! - `{stream}:dead_letter`: Entries that could not be decoded or were
//!   delivered too many times
//!
//! # Reliability
//!
//! An entry stays in the group's pending list from the moment it is claimed
//! until it is acknowledged. If the consumer holding it dies, any consumer in
//! the group reclaims it once it has been idle longer than the liveness
//! timeout.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamInfoGroupsReply, StreamPendingCountReply,
    StreamPendingReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::job::JobDescriptor;

/// Field holding the JSON descriptor in every stream entry.
pub const DATA_FIELD: &str = "data";

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Identifier of a stream entry, in Redis `<ms>-<seq>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A claimed queue entry.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: EntryId,
    pub descriptor: JobDescriptor,
    /// How many times this entry has been handed to a consumer, this claim included.
    pub delivery_count: u64,
}

/// Consumer group summary.
#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub last_delivered_id: String,
}

/// Read-only snapshot of queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub stream: String,
    /// Entries in the stream, acknowledged ones included.
    pub length: u64,
    /// Entries claimed by this handle's group and not yet acknowledged.
    pub pending_count: u64,
    pub dead_letter_length: u64,
    pub groups: Vec<GroupInfo>,
}

/// Names and timing of a consumer within a stream group.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Stream key.
    pub stream: String,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group.
    pub consumer: String,
    /// Idle time after which another consumer may reclaim a pending entry.
    pub liveness_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stream: "review_jobs".to_string(),
            group: "review_workers".to_string(),
            consumer: "worker_1".to_string(),
            liveness_timeout: Duration::from_secs(300),
        }
    }
}

impl StreamSettings {
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            ..Default::default()
        }
    }

    /// Sets the consumer name.
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Sets the liveness timeout.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Key of the dead letter stream.
    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dead_letter", self.stream)
    }
}

/// Durable multi-consumer queue.
///
/// One handle represents one consumer identity inside one group.
#[async_trait]
pub trait StreamQueue: Send + Sync {
    /// Appends a descriptor to the tail of the stream.
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<EntryId, QueueError>;

    /// Claims up to `max_count` entries for this consumer.
    ///
    /// Entries idle past the liveness timeout are reclaimed first; new
    /// entries fill the remainder. Blocks up to `block` only when nothing
    /// could be reclaimed. A timeout yields an empty vector.
    async fn claim(&self, max_count: usize, block: Duration)
        -> Result<Vec<QueueEntry>, QueueError>;

    /// Removes an entry from the group's pending list.
    ///
    /// Returns `true` the first time and `false` for an entry that is not
    /// pending.
    async fn acknowledge(&self, id: &EntryId) -> Result<bool, QueueError>;

    /// Returns a snapshot of stream and group state.
    async fn inspect(&self) -> Result<QueueInfo, QueueError>;

    /// Copies an entry to the dead letter stream and acknowledges it.
    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), QueueError>;

    /// Consumer name of this handle.
    fn consumer(&self) -> &str;
}

/// Redis Streams implementation of [`StreamQueue`].
pub struct RedisStreamQueue {
    client: redis::Client,
    /// Connection for non-blocking commands.
    redis: ConnectionManager,
    /// Connection reserved for blocking XREADGROUP calls.
    blocking: ConnectionManager,
    settings: StreamSettings,
    dead_letter_stream: String,
}

impl RedisStreamQueue {
    /// Connects to Redis and ensures the consumer group exists.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, settings: StreamSettings) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        let blocking = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let queue = Self {
            client,
            redis,
            blocking,
            dead_letter_stream: settings.dead_letter_stream(),
            settings,
        };
        queue.ensure_group().await?;
        Ok(queue)
    }

    /// Returns a handle for another consumer sharing this stream and group.
    ///
    /// The new handle gets its own blocking connection so its reads never
    /// queue behind this handle's.
    pub async fn with_consumer(&self, consumer: impl Into<String>) -> Result<Self, QueueError> {
        let blocking = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client: self.client.clone(),
            redis: self.redis.clone(),
            blocking,
            settings: self.settings.clone().with_consumer(consumer),
            dead_letter_stream: self.dead_letter_stream.clone(),
        })
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Creates the consumer group (and stream) if missing.
    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.settings.stream, &self.settings.group, "0")
            .await;

        match created {
            Ok(()) => {
                debug!(
                    stream = %self.settings.stream,
                    group = %self.settings.group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reclaims pending entries idle past the liveness timeout.
    async fn reclaim_stale(&self, max_count: usize) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.redis.clone();
        let idle_ms = self.settings.liveness_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.settings.stream)
            .arg(&self.settings.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(max_count)
            .query_async(&mut conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = pending.ids.iter().map(|p| p.id.clone()).collect();
        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.settings.stream,
                &self.settings.group,
                &self.settings.consumer,
                idle_ms,
                &ids[..],
            )
            .await?;

        let mut entries = Vec::with_capacity(claimed.ids.len());
        for stream_id in claimed.ids {
            // XCLAIM bumps the delivery counter reported by XPENDING.
            let deliveries = pending
                .ids
                .iter()
                .find(|p| p.id == stream_id.id)
                .map(|p| p.times_delivered as u64 + 1)
                .unwrap_or(1);

            if let Some(entry) = self.decode(stream_id, deliveries).await? {
                warn!(
                    entry_id = %entry.id,
                    job_id = %entry.descriptor.job_id,
                    delivery_count = entry.delivery_count,
                    consumer = %self.settings.consumer,
                    "Reclaimed stale queue entry"
                );
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    /// Reads entries never delivered to the group.
    async fn read_new(
        &self,
        max_count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut options = StreamReadOptions::default()
            .group(&self.settings.group, &self.settings.consumer)
            .count(max_count);
        if let Some(block) = block {
            options = options.block(block.as_millis().max(1) as usize);
        }

        let mut conn = if block.is_some() {
            self.blocking.clone()
        } else {
            self.redis.clone()
        };

        // A BLOCK timeout comes back as nil.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.settings.stream], &[">"], &options)
            .await?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for stream_id in key.ids {
                if let Some(entry) = self.decode(stream_id, 1).await? {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Decodes a raw stream entry, dead-lettering it if unreadable.
    async fn decode(
        &self,
        stream_id: StreamId,
        delivery_count: u64,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let id = EntryId::new(stream_id.id.clone());
        let payload: Option<String> = stream_id.get(DATA_FIELD);

        let decoded = match payload.as_deref() {
            Some(raw) => serde_json::from_str::<JobDescriptor>(raw).map_err(|e| e.to_string()),
            None => Err(format!("missing '{}' field", DATA_FIELD)),
        };

        match decoded {
            Ok(descriptor) => Ok(Some(QueueEntry {
                id,
                descriptor,
                delivery_count,
            })),
            Err(reason) => {
                warn!(entry_id = %id, reason = %reason, "Dead-lettering undecodable entry");
                self.dead_letter_raw(&id, payload.as_deref().unwrap_or(""), &reason)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn dead_letter_raw(
        &self,
        id: &EntryId,
        payload: &str,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let moved_at = chrono::Utc::now().to_rfc3339();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .xadd(
                &self.dead_letter_stream,
                "*",
                &[
                    (DATA_FIELD, payload),
                    ("entry_id", id.as_str()),
                    ("error", reason),
                    ("moved_at", moved_at.as_str()),
                ],
            )
            .ignore()
            .xack(&self.settings.stream, &self.settings.group, &[id.as_str()])
            .ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }
}

#[async_trait]
impl StreamQueue for RedisStreamQueue {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<EntryId, QueueError> {
        let serialized = serde_json::to_string(descriptor)?;
        let mut conn = self.redis.clone();
        let id: String = conn
            .xadd(&self.settings.stream, "*", &[(DATA_FIELD, serialized)])
            .await?;
        Ok(EntryId::new(id))
    }

    async fn claim(
        &self,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let mut entries = self.reclaim_stale(max_count).await?;
        let remaining = max_count - entries.len().min(max_count);
        if remaining == 0 {
            return Ok(entries);
        }

        let block = if entries.is_empty() && !block.is_zero() {
            Some(block)
        } else {
            None
        };
        entries.extend(self.read_new(remaining, block).await?);
        Ok(entries)
    }

    async fn acknowledge(&self, id: &EntryId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let acked: u64 = conn
            .xack(&self.settings.stream, &self.settings.group, &[id.as_str()])
            .await?;
        Ok(acked > 0)
    }

    async fn inspect(&self) -> Result<QueueInfo, QueueError> {
        let mut conn = self.redis.clone();

        let (length, dead_letter_length): (u64, u64) = redis::pipe()
            .xlen(&self.settings.stream)
            .xlen(&self.dead_letter_stream)
            .query_async(&mut conn)
            .await?;

        let pending: StreamPendingReply = conn
            .xpending(&self.settings.stream, &self.settings.group)
            .await?;
        let groups: StreamInfoGroupsReply = conn.xinfo_groups(&self.settings.stream).await?;

        Ok(QueueInfo {
            stream: self.settings.stream.clone(),
            length,
            pending_count: pending.count() as u64,
            dead_letter_length,
            groups: groups
                .groups
                .into_iter()
                .map(|g| GroupInfo {
                    name: g.name,
                    consumers: g.consumers as u64,
                    pending: g.pending as u64,
                    last_delivered_id: g.last_delivered_id,
                })
                .collect(),
        })
    }

    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&entry.descriptor)?;
        self.dead_letter_raw(&entry.id, &payload, reason).await
    }

    fn consumer(&self) -> &str {
        &self.settings.consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err: QueueError = serde_json::from_str::<JobDescriptor>("{")
            .expect_err("truncated json should fail")
            .into();
        assert!(err.to_string().starts_with("Serialization failed"));
    }

    #[test]
    fn test_stream_settings_default() {
        let settings = StreamSettings::default();

        assert_eq!(settings.stream, "review_jobs");
        assert_eq!(settings.group, "review_workers");
        assert_eq!(settings.consumer, "worker_1");
        assert_eq!(settings.liveness_timeout, Duration::from_secs(300));
        assert_eq!(settings.dead_letter_stream(), "review_jobs:dead_letter");
    }

    #[test]
    fn test_stream_settings_builder() {
        let settings = StreamSettings::new("jobs", "group-a")
            .with_consumer("worker-9")
            .with_liveness_timeout(Duration::from_secs(30));

        assert_eq!(settings.stream, "jobs");
        assert_eq!(settings.group, "group-a");
        assert_eq!(settings.consumer, "worker-9");
        assert_eq!(settings.liveness_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_entry_id_ordering() {
        let a = EntryId::new("1700000000000-0");
        let b = EntryId::new("1700000000000-1");
        assert!(a < b);
        assert_eq!(a.to_string(), "1700000000000-0");
    }
}

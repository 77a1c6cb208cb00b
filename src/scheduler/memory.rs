//! In-process stream queue.
//!
//! `MemoryStreamQueue` mirrors the consumer-group behaviour of
//! [`RedisStreamQueue`](super::queue::RedisStreamQueue) for a single group:
//! entries are appended to a log that is never truncated, claims move them
//! into a pending list, acknowledgement removes them, and entries idle past
//! the liveness timeout can be reclaimed by any consumer sharing the state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use super::job::JobDescriptor;
use super::queue::{
    EntryId, GroupInfo, QueueEntry, QueueError, QueueInfo, StreamQueue, StreamSettings,
};

/// An entry moved to the dead letter list.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub entry_id: EntryId,
    pub payload: String,
    pub reason: String,
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    deliveries: u64,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    entries: BTreeMap<u64, String>,
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
    dead_letter: Vec<DeadLetter>,
    consumers: BTreeSet<String>,
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// In-memory [`StreamQueue`] with one consumer group.
///
/// Handles created with [`with_consumer`](Self::with_consumer) share the
/// same log and pending list.
#[derive(Clone)]
pub struct MemoryStreamQueue {
    shared: Arc<Shared>,
    settings: StreamSettings,
}

impl MemoryStreamQueue {
    pub fn new(settings: StreamSettings) -> Self {
        let mut state = State {
            next_seq: 1,
            ..Default::default()
        };
        state.consumers.insert(settings.consumer.clone());

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
            settings,
        }
    }

    /// Returns a handle for another consumer sharing this queue.
    pub fn with_consumer(&self, consumer: impl Into<String>) -> Self {
        let settings = self.settings.clone().with_consumer(consumer);
        self.lock().consumers.insert(settings.consumer.clone());

        Self {
            shared: Arc::clone(&self.shared),
            settings,
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Appends a raw payload, bypassing serialization.
    ///
    /// Lets producers that write their own wire format (or tests) place
    /// arbitrary data on the stream.
    pub fn enqueue_raw(&self, payload: impl Into<String>) -> EntryId {
        let id = {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(seq, payload.into());
            entry_id(seq)
        };
        self.shared.notify.notify_waiters();
        id
    }

    /// Returns the entries moved to the dead letter list so far.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letter.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.shared.state.lock().expect("queue state lock poisoned")
    }

    /// Reclaims stale entries then takes new ones, without waiting.
    fn take(&self, max_count: usize) -> Vec<QueueEntry> {
        let mut state = self.lock();
        let now = Instant::now();
        let liveness = self.settings.liveness_timeout;
        let mut claimed: Vec<(u64, u64)> = Vec::new();

        for (seq, pending) in state.pending.iter_mut() {
            if claimed.len() >= max_count {
                break;
            }
            if now.duration_since(pending.delivered_at) >= liveness {
                pending.consumer = self.settings.consumer.clone();
                pending.delivered_at = now;
                pending.deliveries += 1;
                claimed.push((*seq, pending.deliveries));
            }
        }

        for (seq, deliveries) in &claimed {
            warn!(
                entry_id = %entry_id(*seq),
                delivery_count = deliveries,
                consumer = %self.settings.consumer,
                "Reclaimed stale queue entry"
            );
        }

        let fresh: Vec<u64> = state
            .entries
            .range(state.last_delivered + 1..)
            .take(max_count - claimed.len())
            .map(|(seq, _)| *seq)
            .collect();

        for seq in fresh {
            state.last_delivered = seq;
            state.pending.insert(
                seq,
                PendingEntry {
                    consumer: self.settings.consumer.clone(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            claimed.push((seq, 1));
        }

        let mut entries = Vec::with_capacity(claimed.len());
        for (seq, deliveries) in claimed {
            let payload = state.entries.get(&seq).cloned().unwrap_or_default();
            match serde_json::from_str::<JobDescriptor>(&payload) {
                Ok(descriptor) => entries.push(QueueEntry {
                    id: entry_id(seq),
                    descriptor,
                    delivery_count: deliveries,
                }),
                Err(e) => {
                    warn!(
                        entry_id = %entry_id(seq),
                        reason = %e,
                        "Dead-lettering undecodable entry"
                    );
                    state.pending.remove(&seq);
                    state.dead_letter.push(DeadLetter {
                        entry_id: entry_id(seq),
                        payload,
                        reason: e.to_string(),
                    });
                }
            }
        }

        entries
    }
}

fn entry_id(seq: u64) -> EntryId {
    EntryId::new(format!("{}-0", seq))
}

fn parse_seq(id: &EntryId) -> Option<u64> {
    id.as_str().split('-').next()?.parse().ok()
}

#[async_trait]
impl StreamQueue for MemoryStreamQueue {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<EntryId, QueueError> {
        let payload = serde_json::to_string(descriptor)?;
        Ok(self.enqueue_raw(payload))
    }

    async fn claim(
        &self,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + block;
        loop {
            // Register interest before looking so an enqueue in between is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.take(max_count);
            if !entries.is_empty() || block.is_zero() {
                return Ok(entries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, id: &EntryId) -> Result<bool, QueueError> {
        let Some(seq) = parse_seq(id) else {
            return Ok(false);
        };
        Ok(self.lock().pending.remove(&seq).is_some())
    }

    async fn inspect(&self) -> Result<QueueInfo, QueueError> {
        let state = self.lock();
        let pending = state.pending.len() as u64;

        Ok(QueueInfo {
            stream: self.settings.stream.clone(),
            length: state.entries.len() as u64,
            pending_count: pending,
            dead_letter_length: state.dead_letter.len() as u64,
            groups: vec![GroupInfo {
                name: self.settings.group.clone(),
                consumers: state.consumers.len() as u64,
                pending,
                last_delivered_id: entry_id(state.last_delivered).to_string(),
            }],
        })
    }

    async fn dead_letter(&self, entry: &QueueEntry, reason: &str) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&entry.descriptor)?;
        let mut state = self.lock();
        if let Some(seq) = parse_seq(&entry.id) {
            state.pending.remove(&seq);
        }
        state.dead_letter.push(DeadLetter {
            entry_id: entry.id.clone(),
            payload,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn consumer(&self) -> &str {
        &self.settings.consumer
    }
}

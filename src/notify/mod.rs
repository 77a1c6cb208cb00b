//! Job status notifications.
//!
//! The pipeline publishes a [`JobEvent`] at every status transition through
//! a [`NotificationSink`]. Publishing never blocks and never fails into the
//! pipeline; delivery to clients is the transport's concern.
//!
//! [`NotificationHub`] is the in-process sink: a `tokio::sync::broadcast`
//! channel with per-job and per-user filtered subscriptions. A subscriber
//! that falls behind loses the oldest events rather than stalling workers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::scheduler::job::JobStatus;

const DEFAULT_CAPACITY: usize = 1024;

/// A job status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
    /// Free-form details (progress message, tokens, cost, error).
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        status: JobStatus,
        data: serde_json::Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            status,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Fire-and-forget receiver of job events.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Broadcast hub fanning events out to subscribers.
///
/// Clones share the same channel.
#[derive(Clone)]
pub struct NotificationHub {
    tx: Arc<broadcast::Sender<JobEvent>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribes to every event.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Filter::All,
        }
    }

    /// Subscribes to events of one job.
    pub fn subscribe_job(&self, job_id: impl Into<String>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Filter::Job(job_id.into()),
        }
    }

    /// Subscribes to events of every job owned by one user.
    pub fn subscribe_user(&self, user_id: impl Into<String>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Filter::User(user_id.into()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationHub {
    fn publish(&self, event: JobEvent) {
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone)]
enum Filter {
    All,
    Job(String),
    User(String),
}

impl Filter {
    fn matches(&self, event: &JobEvent) -> bool {
        match self {
            Filter::All => true,
            Filter::Job(id) => event.job_id == *id,
            Filter::User(id) => event.user_id == *id,
        }
    }
}

/// A filtered stream of job events.
pub struct Subscription {
    rx: broadcast::Receiver<JobEvent>,
    filter: Filter,
}

impl Subscription {
    /// Waits for the next matching event.
    ///
    /// Returns `None` once the hub and all its clones are dropped.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

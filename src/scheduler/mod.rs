//! Durable job queue, job definitions and the consumer loop.
//!
//! This module provides infrastructure for at-least-once job execution:
//!
//! - **StreamQueue**: Redis Streams queue with consumer groups, plus an
//!   in-memory implementation with the same semantics
//! - **Producer**: Creates the job record, then enqueues its descriptor
//! - **WorkerPool**: Claims batches and runs them through the pipeline with
//!   bounded concurrency
//! - **Job**: Job records with forward-only status transitions
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API/CLI)   │
//!                      └──────┬───────┘
//!                             │ XADD
//!                      ┌──────▼───────┐
//!                      │ Redis Stream │──── {stream}:dead_letter
//!                      │ + group PEL  │
//!                      └──────┬───────┘
//!                             │ XREADGROUP / XCLAIM
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌──────────┐        ┌──────────┐        ┌──────────┐
//!    │ worker_1 │        │ worker_2 │        │ worker_N │
//!    │ W slots  │        │ W slots  │        │ W slots  │
//!    └──────────┘        └──────────┘        └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use insight_worker::scheduler::{
//!     Producer, RedisStreamQueue, StreamSettings, WorkerPool, WorkerPoolConfig,
//! };
//! use std::sync::Arc;
//!
//! let queue = Arc::new(RedisStreamQueue::connect("redis://localhost:6379", StreamSettings::default()).await?);
//!
//! let producer = Producer::new(queue.clone(), store.clone());
//! producer.submit("user-1", JobKind::Review, input).await?;
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(5), queue, orchestrator);
//! pool.start()?;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```
//!
//! # Reliability Features
//!
//! - **Pending entry list**: Claimed entries stay pending until acknowledged
//! - **Crash recovery**: Entries idle past the liveness timeout are reclaimed
//!   by any consumer in the group
//! - **Dead letter stream**: Undecodable entries and entries past the
//!   delivery cap are moved aside
//! - **Graceful shutdown**: The in-flight batch finishes before the loop exits

pub mod job;
pub mod memory;
pub mod producer;
pub mod queue;
pub mod worker_pool;

// Re-export main types for convenience
pub use job::{Job, JobDescriptor, JobInput, JobKind, JobResult, JobStatus, TokenUsage};
pub use memory::{DeadLetter, MemoryStreamQueue};
pub use producer::{Producer, SubmitError};
pub use queue::{
    EntryId, GroupInfo, QueueEntry, QueueError, QueueInfo, RedisStreamQueue, StreamQueue,
    StreamSettings,
};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};

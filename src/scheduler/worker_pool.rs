//! Consumer loop dispatching queue entries to the pipeline.
//!
//! One long-lived task claims batches of up to `concurrency` entries and
//! runs each as its own tokio task, bounded by a semaphore. The whole batch
//! is joined before the next claim.
//!
//! # Features
//!
//! - Bounded concurrency with owned semaphore permits
//! - Graceful shutdown with broadcast channel
//! - Acknowledgement only for terminal outcomes
//! - Dead letter stream for entries past the delivery cap
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::pipeline::{AttemptOutcome, PipelineOrchestrator};

use super::queue::{QueueEntry, StreamQueue};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Configuration cannot run.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Maximum attempts running at once, also the claim batch size.
    pub concurrency: usize,
    /// How long a claim blocks waiting for new entries.
    pub block_timeout: Duration,
    /// Deliveries after which an entry is dead-lettered.
    pub max_deliveries: u64,
    /// Pause after a failed claim.
    pub error_backoff: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            block_timeout: Duration::from_secs(5),
            max_deliveries: 5,
            error_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified concurrency.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }

    /// Sets the blocking claim timeout.
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Sets the delivery cap.
    pub fn with_max_deliveries(mut self, max: u64) -> Self {
        self.max_deliveries = max;
        self
    }

    /// Sets the pause after a failed claim.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub concurrency: usize,
    /// Attempts currently holding a permit.
    pub active_workers: usize,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Attempts left pending for redelivery.
    pub jobs_deferred: u64,
    /// Redeliveries of jobs that were already terminal.
    pub jobs_skipped: u64,
    pub dead_lettered: u64,
    pub claim_errors: u64,
}

impl PoolStats {
    /// Returns the number of jobs that reached a terminal state.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
#[derive(Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_deferred: AtomicU64,
    jobs_skipped: AtomicU64,
    dead_lettered: AtomicU64,
    claim_errors: AtomicU64,
}

impl SharedPoolStats {
    fn record(&self, outcome: &AttemptOutcome) {
        let counter = match outcome {
            AttemptOutcome::Completed { .. } => &self.jobs_completed,
            AttemptOutcome::Failed(_) => &self.jobs_failed,
            AttemptOutcome::Deferred(_) => &self.jobs_deferred,
            AttemptOutcome::Skipped(_) => &self.jobs_skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, concurrency: usize, available_permits: usize) -> PoolStats {
        PoolStats {
            concurrency,
            active_workers: concurrency.saturating_sub(available_permits),
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            jobs_deferred: self.jobs_deferred.load(Ordering::SeqCst),
            jobs_skipped: self.jobs_skipped.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            claim_errors: self.claim_errors.load(Ordering::SeqCst),
        }
    }
}

/// Runs the consumer loop of one queue handle.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn StreamQueue>,
    orchestrator: Arc<PipelineOrchestrator>,
    semaphore: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    consumer_handle: Option<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a worker pool over a queue handle.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn StreamQueue>,
        orchestrator: Arc<PipelineOrchestrator>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        Self {
            config,
            queue,
            orchestrator,
            semaphore,
            shutdown_tx,
            consumer_handle: None,
            stats: Arc::new(SharedPoolStats::default()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Spawns the consumer loop.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        if self.config.concurrency == 0 {
            return Err(PoolError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        let consumer = ConsumerLoop {
            config: self.config.clone(),
            queue: Arc::clone(&self.queue),
            orchestrator: Arc::clone(&self.orchestrator),
            semaphore: Arc::clone(&self.semaphore),
            shutdown_rx: self.shutdown_tx.subscribe(),
            stats: Arc::clone(&self.stats),
            metrics: MetricsCollector::new(),
        };

        self.consumer_handle = Some(tokio::spawn(consumer.run()));
        self.is_running.store(true, Ordering::SeqCst);
        info!(
            consumer = %self.queue.consumer(),
            concurrency = self.config.concurrency,
            "Worker pool started"
        );

        Ok(())
    }

    /// Stops claiming, lets the in-flight batch finish and joins the loop.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if the batch does not finish
    /// within the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - the loop may have already stopped
        let _ = self.shutdown_tx.send(());

        let Some(handle) = self.consumer_handle.take() else {
            self.is_running.store(false, Ordering::SeqCst);
            return Ok(());
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, handle).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(Ok(())) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Consumer loop panicked during shutdown");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats
            .to_pool_stats(self.config.concurrency, self.semaphore.available_permits())
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns a reference to the queue handle.
    pub fn queue(&self) -> &Arc<dyn StreamQueue> {
        &self.queue
    }
}

struct ConsumerLoop {
    config: WorkerPoolConfig,
    queue: Arc<dyn StreamQueue>,
    orchestrator: Arc<PipelineOrchestrator>,
    semaphore: Arc<Semaphore>,
    shutdown_rx: broadcast::Receiver<()>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl ConsumerLoop {
    /// Main loop.
    ///
    /// Claims and processes batches until a shutdown signal is received.
    async fn run(mut self) {
        let consumer = self.queue.consumer().to_string();
        info!(consumer = %consumer, "Consumer loop started");
        self.report_depth().await;

        loop {
            // Check for shutdown signal (non-blocking)
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(consumer = %consumer, "Consumer received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let entries = match self
                .queue
                .claim(self.config.concurrency, self.config.block_timeout)
                .await
            {
                Ok(entries) => entries,
                Err(e) => {
                    error!(consumer = %consumer, error = %e, "Failed to claim entries");
                    self.stats.claim_errors.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(self.config.error_backoff).await;
                    continue;
                }
            };

            if entries.is_empty() {
                debug!(consumer = %consumer, "No entries available");
                continue;
            }

            self.process_batch(entries).await;
            self.report_depth().await;
        }

        info!(consumer = %consumer, "Consumer loop stopped");
    }

    async fn process_batch(&self, entries: Vec<QueueEntry>) {
        let mut running = Vec::with_capacity(entries.len());

        for entry in entries {
            if entry.delivery_count > self.config.max_deliveries {
                self.dead_letter(&entry).await;
                continue;
            }

            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    // Closed semaphore; the entry stays pending for redelivery.
                    error!(entry_id = %entry.id, error = %e, "Failed to acquire permit");
                    continue;
                }
            };

            debug!(
                entry_id = %entry.id,
                job_id = %entry.descriptor.job_id,
                delivery = entry.delivery_count,
                "Dispatching entry"
            );

            let orchestrator = Arc::clone(&self.orchestrator);
            let descriptor = entry.descriptor.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                orchestrator.process(&descriptor).await
            });
            running.push((entry, handle));
        }

        let finished = join_all(
            running
                .into_iter()
                .map(|(entry, handle)| async move { (entry, handle.await) }),
        )
        .await;

        for (entry, joined) in finished {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        entry_id = %entry.id,
                        job_id = %entry.descriptor.job_id,
                        error = %e,
                        "Job attempt panicked"
                    );
                    self.orchestrator
                        .abandon(&entry.descriptor, &format!("attempt aborted: {}", e))
                        .await
                }
            };

            self.stats.record(&outcome);

            if outcome.should_ack() {
                self.acknowledge(&entry).await;
            }
        }
    }

    async fn acknowledge(&self, entry: &QueueEntry) {
        match self.queue.acknowledge(&entry.id).await {
            Ok(true) => debug!(entry_id = %entry.id, "Entry acknowledged"),
            Ok(false) => debug!(entry_id = %entry.id, "Entry was no longer pending"),
            Err(e) => warn!(
                entry_id = %entry.id,
                error = %e,
                "Failed to acknowledge entry, it will be redelivered"
            ),
        }
    }

    async fn dead_letter(&self, entry: &QueueEntry) {
        const REASON: &str = "exceeded maximum delivery attempts";

        warn!(
            entry_id = %entry.id,
            job_id = %entry.descriptor.job_id,
            deliveries = entry.delivery_count,
            max_deliveries = self.config.max_deliveries,
            "Delivery cap exceeded, dead-lettering entry"
        );

        let outcome = self.orchestrator.abandon(&entry.descriptor, REASON).await;
        self.stats.record(&outcome);
        if !outcome.should_ack() {
            // Failure not recorded; keep the entry pending until it is.
            return;
        }

        match self.queue.dead_letter(entry, REASON).await {
            Ok(()) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => error!(
                entry_id = %entry.id,
                error = %e,
                "Failed to dead-letter entry"
            ),
        }
    }

    async fn report_depth(&self) {
        match self.queue.inspect().await {
            Ok(info) => self.metrics.update_queue_depth(&info.stream, info.length),
            Err(e) => debug!(error = %e, "Failed to read queue depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;
    use crate::pipeline::{Stage, StageFailure};
    use crate::scheduler::job::JobStatus;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert_eq!(config.concurrency, 5);
        assert_eq!(config.block_timeout, Duration::from_secs(5));
        assert_eq!(config.max_deliveries, 5);
        assert_eq!(config.error_backoff, Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(8)
            .with_block_timeout(Duration::from_millis(100))
            .with_max_deliveries(2)
            .with_error_backoff(Duration::from_millis(10))
            .with_shutdown_timeout(Duration::from_secs(120));

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.block_timeout, Duration::from_millis(100));
        assert_eq!(config.max_deliveries, 2);
        assert_eq!(config.error_backoff, Duration::from_millis(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            concurrency: 4,
            jobs_completed: 80,
            jobs_failed: 20,
            ..Default::default()
        };

        assert_eq!(stats.total_processed(), 100);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
        assert!((PoolStats::default().success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::default();
        let failure = StageFailure::new(Stage::Persist, FailureClass::TransientInfra, "down");

        stats.record(&AttemptOutcome::Completed { cache_hit: false });
        stats.record(&AttemptOutcome::Completed { cache_hit: true });
        stats.record(&AttemptOutcome::Deferred(failure));
        stats.record(&AttemptOutcome::Skipped(JobStatus::Completed));

        let pool_stats = stats.to_pool_stats(4, 1);
        assert_eq!(pool_stats.active_workers, 3);
        assert_eq!(pool_stats.jobs_completed, 2);
        assert_eq!(pool_stats.jobs_failed, 0);
        assert_eq!(pool_stats.jobs_deferred, 1);
        assert_eq!(pool_stats.jobs_skipped, 1);
    }

    #[test]
    fn test_pool_error_display() {
        assert!(PoolError::AlreadyRunning
            .to_string()
            .contains("already running"));
        assert!(PoolError::NotRunning.to_string().contains("not running"));
        assert!(PoolError::ShutdownTimeout(Duration::from_secs(60))
            .to_string()
            .contains("60"));
    }
}

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{
    DocumentKey, LEASE_PARTITION_STATUS_KEY, PartitionStatus, StreamType, Task,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job_store::JobStore;
use crate::lease_service::{LeaseHandle, LeaseManager};
use crate::partition_cursor::{Boundary, CursorEvent, PartitionCursor};
use crate::scheduler_config::SchedulerConfig;
use crate::scheduler_stats::WorkerStats;
use crate::store_ports::{DocumentProcessor, DocumentStore, ProcessingContext};

mod acquire;

/// Partition acquired by a worker and ready to drain.
struct AcquiredPartition {
    number: u32,
    lease: LeaseHandle,
    cursor: PartitionCursor,
    context: ProcessingContext,
    prior_errors: i64,
}

/// Where a partition scan ended.
enum DrainOutcome {
    Eof,
    Failed(AppError),
    Cancelled,
}

/// Exhausts the partitions of one task, one at a time.
///
/// Partitions are visited in a per-worker random order so workers started
/// together on the same task spread out instead of colliding. Each
/// partition is leased before it is read; other workers skip it until the
/// lease is released or expires.
pub struct PartitionWorker {
    task: Task,
    store: Arc<dyn DocumentStore>,
    leases: LeaseManager,
    jobs: JobStore,
    processor: Arc<dyn DocumentProcessor>,
    batch_size: usize,
    commit_every: usize,
    max_restarts: u32,
    rng: StdRng,
    order: Vec<u32>,
    position: usize,
    cancel: CancellationToken,
    stats: WorkerStats,
}

impl PartitionWorker {
    /// Creates a worker for one task.
    pub fn new(
        task: Task,
        store: Arc<dyn DocumentStore>,
        leases: LeaseManager,
        jobs: JobStore,
        processor: Arc<dyn DocumentProcessor>,
        config: &SchedulerConfig,
    ) -> AppResult<Self> {
        if task.partitions.is_empty() {
            return Err(AppError::Validation(format!(
                "task '{}' has no partitions",
                task.id
            )));
        }

        if task.properties.collection.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "task '{}' has no source collection",
                task.id
            )));
        }

        Ok(Self {
            batch_size: task.properties.batch_size.unwrap_or(config.batch_size).max(1),
            commit_every: config.commit_every.max(1),
            max_restarts: task.properties.max_restarts.unwrap_or(config.max_restarts),
            task,
            store,
            leases,
            jobs,
            processor,
            rng: StdRng::from_entropy(),
            order: Vec::new(),
            position: 0,
            cancel: CancellationToken::new(),
            stats: WorkerStats::default(),
        })
    }

    /// Uses a fixed seed for the partition order.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Observes the given token between documents and partitions.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the task this worker drains.
    #[must_use]
    pub fn task_id(&self) -> &str {
        self.task.id.as_str()
    }

    /// Processes partitions until none is left to acquire.
    ///
    /// Other workers may still be finishing partitions they acquired
    /// earlier when this returns.
    pub async fn start(mut self) -> WorkerStats {
        self.order = self
            .task
            .partitions
            .iter()
            .map(|partition| partition.number)
            .collect();
        self.order.shuffle(&mut self.rng);
        self.position = 0;

        info!(
            task_id = %self.task.id,
            partitions = self.order.len(),
            "partition worker started"
        );

        while let Some(acquired) = self.acquire_partition().await {
            self.process_partition(acquired).await;
            if self.cancel.is_cancelled() {
                break;
            }
        }

        info!(
            task_id = %self.task.id,
            documents = self.stats.documents,
            completed = self.stats.partitions_completed,
            errors = self.stats.errors,
            "partition worker finished"
        );
        self.stats
    }

    async fn process_partition(&mut self, acquired: AcquiredPartition) {
        let AcquiredPartition {
            number,
            lease,
            mut cursor,
            context,
            prior_errors,
        } = acquired;
        let mut last_processed = lease.resume_key().await;
        let mut pending = 0_usize;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break DrainOutcome::Cancelled;
            }

            let document = match cursor.next().await {
                Ok(CursorEvent::Document(document)) => document,
                Ok(CursorEvent::Boundary(Boundary::Eof)) => break DrainOutcome::Eof,
                Ok(CursorEvent::Boundary(Boundary::Error(message))) => {
                    break DrainOutcome::Failed(AppError::Store(message));
                }
                Err(error) => break DrainOutcome::Failed(error),
            };

            self.stats.documents += 1;
            if let Err(error) = self.processor.process(&context, &document).await {
                break DrainOutcome::Failed(error);
            }

            last_processed = Some(document.key);
            pending += 1;
            if pending >= self.commit_every {
                if let Err(error) = self.commit(&lease, last_processed.clone(), false).await {
                    break DrainOutcome::Failed(error);
                }
                pending = 0;
            }
        };

        match outcome {
            DrainOutcome::Eof => self.finish_partition(number, lease, last_processed).await,
            DrainOutcome::Cancelled => {
                debug!(partition_id = %context.partition_id, "partition scan cancelled");
                if let Err(error) = self.commit(&lease, last_processed, false).await {
                    self.abandon(&context.partition_id, lease, error).await;
                    return;
                }
                self.release(&context.partition_id, lease).await;
            }
            DrainOutcome::Failed(error) => {
                self.fail_partition(number, &context, lease, last_processed, prior_errors, error)
                    .await;
            }
        }
    }

    async fn finish_partition(
        &mut self,
        number: u32,
        lease: LeaseHandle,
        last_processed: Option<DocumentKey>,
    ) {
        let partition_id = lease.object_id().to_owned();

        if self.task.stream_type == StreamType::Infinite {
            if let Err(error) = self.commit(&lease, last_processed, false).await {
                self.abandon(&partition_id, lease, error).await;
                return;
            }
            self.stats.partitions_caught_up += 1;
            debug!(partition_id = %partition_id, "infinite partition caught up");
            self.release(&partition_id, lease).await;
            return;
        }

        // The lease records EOF before the partition does, so a crash between
        // the two writes is reconciled by the next acquirer.
        lease
            .set_data(LEASE_PARTITION_STATUS_KEY, PartitionStatus::Eof.as_str())
            .await;
        if let Err(error) = self.commit(&lease, last_processed, false).await {
            self.abandon(&partition_id, lease, error).await;
            return;
        }

        match self
            .jobs
            .set_partition_status(&lease, &self.task.id, number, PartitionStatus::Eof)
            .await
        {
            Ok(_) => {
                self.stats.partitions_completed += 1;
                info!(task_id = %self.task.id, partition_id = %partition_id, "partition reached EOF");
            }
            Err(error) => {
                self.stats.errors += 1;
                warn!(
                    partition_id = %partition_id,
                    error = %error,
                    "failed to mark partition EOF"
                );
            }
        }

        self.release(&partition_id, lease).await;
    }

    async fn fail_partition(
        &mut self,
        number: u32,
        context: &ProcessingContext,
        lease: LeaseHandle,
        last_processed: Option<DocumentKey>,
        prior_errors: i64,
        error: AppError,
    ) {
        if error.is_ownership_lost() {
            self.abandon(&context.partition_id, lease, error).await;
            return;
        }

        self.stats.errors += 1;

        warn!(
            task_id = %self.task.id,
            partition_id = %context.partition_id,
            resume_key = ?last_processed,
            error = %error,
            "partition processing failed"
        );

        if let Err(count_error) = self
            .jobs
            .record_partition_error(&lease, &self.task.id, number)
            .await
        {
            warn!(
                partition_id = %context.partition_id,
                error = %count_error,
                "failed to record partition error"
            );
        }

        if let Err(sync_error) = self.commit(&lease, last_processed, true).await {
            self.abandon(&context.partition_id, lease, sync_error).await;
            return;
        }

        let errors = prior_errors.saturating_add(1);
        if errors >= i64::from(self.max_restarts) {
            match self
                .jobs
                .set_partition_status(&lease, &self.task.id, number, PartitionStatus::Error)
                .await
            {
                Ok(_) => {
                    self.stats.partitions_failed += 1;
                    warn!(
                        partition_id = %context.partition_id,
                        errors,
                        max_restarts = self.max_restarts,
                        "partition exhausted its restarts"
                    );
                }
                Err(status_error) => warn!(
                    partition_id = %context.partition_id,
                    error = %status_error,
                    "failed to mark partition error"
                ),
            }
        }

        self.release(&context.partition_id, lease).await;
    }

    /// Writes the resume key into the lease and renews it.
    async fn commit(
        &mut self,
        lease: &LeaseHandle,
        key: Option<DocumentKey>,
        with_errors: bool,
    ) -> AppResult<()> {
        if let Some(key) = key {
            lease.set_resume_key(key).await;
        }
        lease.renew(with_errors).await?;
        self.stats.lease_commits += 1;
        Ok(())
    }

    async fn release(&mut self, partition_id: &str, lease: LeaseHandle) {
        if let Err(error) = lease.release().await {
            self.stats.errors += 1;
            warn!(partition_id, error = %error, "failed to release partition lease");
        }
    }

    /// Drops the lease without writing when ownership was lost; otherwise
    /// releases it.
    async fn abandon(&mut self, partition_id: &str, lease: LeaseHandle, error: AppError) {
        if error.is_ownership_lost() {
            self.stats.leases_lost += 1;
            warn!(partition_id, error = %error, "partition lease lost, abandoning scan");
            drop(lease);
            return;
        }

        self.stats.errors += 1;
        warn!(partition_id, error = %error, "partition lease sync failed");
        self.release(partition_id, lease).await;
    }
}

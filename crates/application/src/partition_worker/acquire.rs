use shardwork_domain::{LEASE_PARTITION_STATUS_KEY, PartitionStatus, StreamType};
use tracing::{debug, info, warn};

use super::{AcquiredPartition, PartitionWorker};
use crate::lease_service::LeaseHandle;
use crate::partition_cursor::PartitionCursor;
use crate::store_ports::ProcessingContext;

impl PartitionWorker {
    /// Leases the next available partition in this worker's order.
    ///
    /// Returns `None` once the order is exhausted or the worker was cancelled.
    pub(super) async fn acquire_partition(&mut self) -> Option<AcquiredPartition> {
        while self.position < self.order.len() {
            if self.cancel.is_cancelled() {
                return None;
            }

            let number = self.order[self.position];
            self.position += 1;

            let Some(partition) = self.task.partition(number) else {
                continue;
            };
            if partition.status != PartitionStatus::Available {
                continue;
            }
            let partition_id = partition.id.clone();

            let lease = match self.leases.acquire(&self.task.id, &partition_id, false).await {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    debug!(partition_id = %partition_id, "partition held by another worker");
                    continue;
                }
                Err(error) => {
                    self.stats.errors += 1;
                    warn!(partition_id = %partition_id, error = %error, "partition lease acquisition failed");
                    continue;
                }
            };

            let refreshed = match self.jobs.find_task(&self.task.id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    warn!(task_id = %self.task.id, "task disappeared while acquiring partitions");
                    self.release(&partition_id, lease).await;
                    return None;
                }
                Err(error) => {
                    self.stats.errors += 1;
                    warn!(task_id = %self.task.id, error = %error, "failed to refresh task");
                    self.release(&partition_id, lease).await;
                    continue;
                }
            };
            self.task = refreshed;

            let Some(partition) = self.task.partition(number).cloned() else {
                self.release(&partition_id, lease).await;
                continue;
            };
            if partition.status != PartitionStatus::Available {
                debug!(
                    partition_id = %partition_id,
                    status = partition.status.as_str(),
                    "partition finished before lease was acquired"
                );
                self.release(&partition_id, lease).await;
                continue;
            }

            if self.reconcile_eof(number, &lease).await {
                self.release(&partition_id, lease).await;
                continue;
            }

            if let Err(error) = self
                .jobs
                .record_partition_acquisition(&lease, &self.task.id, number)
                .await
            {
                warn!(partition_id = %partition_id, error = %error, "failed to count partition acquisition");
            }

            let context = ProcessingContext {
                job_id: self.task.job_id.clone(),
                task_id: self.task.id.clone(),
                partition_id: partition_id.clone(),
                collection: self.task.properties.collection.clone(),
            };
            let resume_key = lease.resume_key().await;
            self.stats.partitions_acquired += 1;

            let cursor = match PartitionCursor::query(
                self.store.clone(),
                self.task.properties.collection.clone(),
                partition.filter_template.clone(),
                resume_key.clone(),
                self.batch_size,
            )
            .await
            {
                Ok(cursor) => cursor,
                Err(error) => {
                    self.fail_partition(
                        number,
                        &context,
                        lease,
                        resume_key,
                        partition.errors,
                        error,
                    )
                    .await;
                    continue;
                }
            };

            info!(
                task_id = %self.task.id,
                partition_id = %partition_id,
                resume_key = ?resume_key,
                "partition acquired"
            );

            return Some(AcquiredPartition {
                number,
                lease,
                cursor,
                context,
                prior_errors: partition.errors,
            });
        }

        None
    }

    /// Completes a partition whose lease already recorded EOF.
    ///
    /// Returns true when the partition needs no further reading.
    async fn reconcile_eof(&mut self, number: u32, lease: &LeaseHandle) -> bool {
        if self.task.stream_type != StreamType::Finite {
            return false;
        }

        let data = lease.data().await;
        if data.get_str(LEASE_PARTITION_STATUS_KEY) != Some(PartitionStatus::Eof.as_str()) {
            return false;
        }

        match self
            .jobs
            .set_partition_status(lease, &self.task.id, number, PartitionStatus::Eof)
            .await
        {
            Ok(_) => {
                self.stats.partitions_completed += 1;
                info!(
                    task_id = %self.task.id,
                    partition_id = %lease.object_id(),
                    "reconciled partition EOF recorded in lease"
                );
            }
            Err(error) => {
                self.stats.errors += 1;
                warn!(
                    partition_id = %lease.object_id(),
                    error = %error,
                    "failed to reconcile partition EOF"
                );
            }
        }
        true
    }
}

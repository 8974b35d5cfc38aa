use std::collections::HashMap;
use std::sync::Arc;

use shardwork_core::AppResult;
use shardwork_domain::{Job, PartitionStatus, Task, TaskStatus};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job_store::JobStore;
use crate::lease_service::LeaseManager;
use crate::partition_worker::PartitionWorker;
use crate::scheduler_config::SchedulerConfig;
use crate::scheduler_stats::{DriverStats, WorkerStats};
use crate::store_ports::{DocumentProcessor, DocumentStore};

mod rollup;

pub use rollup::RollupOutcome;

/// Result of one finished worker: job id, task id and its counters.
type WorkerOutput = (String, String, WorkerStats);

/// Top-level scheduling loop.
///
/// Each tick discovers available tasks of available jobs and starts one
/// [`PartitionWorker`] per task that is not already running here. When a
/// worker finishes, the task is rolled up under a lease on its job.
#[derive(Clone)]
pub struct SchedulerDriver {
    config: SchedulerConfig,
    store: Arc<dyn DocumentStore>,
    jobs: JobStore,
    leases: LeaseManager,
    processor: Arc<dyn DocumentProcessor>,
}

impl SchedulerDriver {
    /// Creates a driver from validated configuration.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn DocumentStore>,
        processor: Arc<dyn DocumentProcessor>,
    ) -> AppResult<Self> {
        let config = config.validate()?;
        let jobs = JobStore::new(
            store.clone(),
            config.jobs_collection.clone(),
            config.tasks_collection.clone(),
        );
        let leases = LeaseManager::new(
            store.clone(),
            config.leases_collection.clone(),
            config.holder_id.clone(),
            config.lease_duration_seconds,
        )
        .with_renew_fraction(config.renew_fraction);

        Ok(Self {
            config,
            store,
            jobs,
            leases,
            processor,
        })
    }

    /// Returns the job store used by this driver.
    #[must_use]
    pub fn job_store(&self) -> &JobStore {
        &self.jobs
    }

    /// Runs until shutdown, idle exit or the iteration limit.
    ///
    /// Fails only when job discovery keeps failing, since no progress is
    /// possible without the store.
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<DriverStats> {
        let worker_cancel = shutdown.child_token();
        let mut workers: JoinSet<WorkerOutput> = JoinSet::new();
        let mut running: HashMap<String, AbortHandle> = HashMap::new();
        let mut stats = DriverStats::default();
        let mut discovery_failures = 0_u32;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            holder_id = %self.config.holder_id,
            ambits = ?self.config.ambits,
            "scheduler driver started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("scheduler shutdown requested");
                    break;
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    self.finish_worker(joined, &mut running, &mut stats).await;
                }
                _ = ticker.tick() => {
                    stats.iterations += 1;
                    match self
                        .dispatch(&mut workers, &mut running, &worker_cancel, &mut stats)
                        .await
                    {
                        Ok(found) => {
                            discovery_failures = 0;
                            if found == 0 && workers.is_empty() && self.config.exit_on_idle {
                                info!(iterations = stats.iterations, "no work found, exiting");
                                break;
                            }
                        }
                        Err(discovery_error) => {
                            discovery_failures += 1;
                            warn!(
                                failures = discovery_failures,
                                error = %discovery_error,
                                "job discovery failed"
                            );
                            if discovery_failures >= self.config.max_discovery_failures {
                                error!(
                                    failures = discovery_failures,
                                    "job discovery keeps failing, stopping scheduler"
                                );
                                worker_cancel.cancel();
                                self.drain(&mut workers, &mut running, &mut stats).await;
                                return Err(discovery_error);
                            }
                        }
                    }

                    if self
                        .config
                        .max_iterations
                        .is_some_and(|limit| stats.iterations >= limit)
                    {
                        info!(iterations = stats.iterations, "iteration limit reached");
                        break;
                    }
                }
            }
        }

        self.drain(&mut workers, &mut running, &mut stats).await;
        info!(
            iterations = stats.iterations,
            tasks_done = stats.tasks_done,
            jobs_done = stats.jobs_done,
            documents = stats.workers.documents,
            "scheduler driver stopped"
        );
        Ok(stats)
    }

    /// Starts workers for newly discovered tasks, rolls up finished or
    /// lagging ones, and returns how many tasks still need work.
    async fn dispatch(
        &self,
        workers: &mut JoinSet<WorkerOutput>,
        running: &mut HashMap<String, AbortHandle>,
        cancel: &CancellationToken,
        stats: &mut DriverStats,
    ) -> AppResult<usize> {
        let jobs = self.jobs.find_available_jobs(&self.config.ambits).await?;
        let mut found = 0;

        for job in jobs {
            let tasks = self
                .jobs
                .find_tasks(&job.id, TaskStatus::Available)
                .await?;

            for task_id in lagging_task_refs(&job, &tasks) {
                if !self.rollup_logged(&job.id, &task_id, stats).await {
                    found += 1;
                }
            }

            for task in tasks {
                if running.contains_key(&task.id) {
                    found += 1;
                    continue;
                }

                if !task
                    .partitions
                    .iter()
                    .any(|partition| partition.status == PartitionStatus::Available)
                {
                    if task.rollup_status().is_none() {
                        debug!(
                            job_id = %job.id,
                            task_id = %task.id,
                            "task held by closed partitions"
                        );
                    } else if !self.rollup_logged(&job.id, &task.id, stats).await {
                        found += 1;
                    }
                    continue;
                }

                found += 1;
                let task_id = task.id.clone();
                let job_id = job.id.clone();
                let worker = match PartitionWorker::new(
                    task,
                    self.store.clone(),
                    self.leases.clone(),
                    self.jobs.clone(),
                    self.processor.clone(),
                    &self.config,
                ) {
                    Ok(worker) => worker.with_cancellation(cancel.clone()),
                    Err(worker_error) => {
                        warn!(
                            task_id = %task_id,
                            error = %worker_error,
                            "skipping task that cannot start a worker"
                        );
                        continue;
                    }
                };

                let output_task_id = task_id.clone();
                let handle = workers.spawn(async move {
                    let worker_stats = worker.start().await;
                    (job_id, output_task_id, worker_stats)
                });
                running.insert(task_id.clone(), handle);
                stats.tasks_dispatched += 1;
                debug!(job_id = %job.id, task_id = %task_id, "partition worker dispatched");
            }
        }

        Ok(found)
    }

    async fn finish_worker(
        &self,
        joined: Result<WorkerOutput, tokio::task::JoinError>,
        running: &mut HashMap<String, AbortHandle>,
        stats: &mut DriverStats,
    ) {
        match joined {
            Ok((job_id, task_id, worker_stats)) => {
                running.remove(&task_id);
                stats.workers.merge(&worker_stats);
                self.rollup_logged(&job_id, &task_id, stats).await;
            }
            Err(join_error) => {
                running.retain(|_, handle| handle.id() != join_error.id());
                error!(error = %join_error, "partition worker did not complete");
            }
        }
    }

    async fn drain(
        &self,
        workers: &mut JoinSet<WorkerOutput>,
        running: &mut HashMap<String, AbortHandle>,
        stats: &mut DriverStats,
    ) {
        while let Some(joined) = workers.join_next().await {
            self.finish_worker(joined, running, stats).await;
        }
    }

    /// Runs one roll-up and records it; returns whether the task is settled.
    async fn rollup_logged(&self, job_id: &str, task_id: &str, stats: &mut DriverStats) -> bool {
        match self.rollup_task(job_id, task_id).await {
            Ok(RollupOutcome::Skipped) => {
                stats.rollups_skipped += 1;
                warn!(job_id, task_id, "job lease held elsewhere, skipping roll-up");
                false
            }
            Ok(RollupOutcome::TaskDone { job_done }) => {
                stats.tasks_done += 1;
                info!(job_id, task_id, "task done");
                if job_done {
                    stats.jobs_done += 1;
                    info!(job_id, "job done");
                }
                true
            }
            Ok(RollupOutcome::Reconciled { job_done }) => {
                info!(job_id, task_id, "job caught up with final task");
                if job_done {
                    stats.jobs_done += 1;
                    info!(job_id, "job done");
                }
                true
            }
            Ok(RollupOutcome::TaskFailed) => {
                stats.tasks_failed += 1;
                warn!(job_id, task_id, "task failed, partitions exhausted their restarts");
                true
            }
            Ok(RollupOutcome::AlreadyFinal) => {
                debug!(job_id, task_id, "task already rolled up");
                true
            }
            Ok(RollupOutcome::Pending) => {
                debug!(job_id, task_id, "task still has open partitions");
                false
            }
            Err(rollup_error) => {
                warn!(job_id, task_id, error = %rollup_error, "task roll-up failed");
                false
            }
        }
    }
}

/// Task references an available job still needs rolled up: references that
/// read available while the task itself is no longer available, or any one
/// reference of a complete job whose own status never advanced.
fn lagging_task_refs(job: &Job, available: &[Task]) -> Vec<String> {
    let lagging: Vec<String> = job
        .tasks
        .iter()
        .filter(|task_ref| {
            task_ref.status == TaskStatus::Available
                && !available.iter().any(|task| task.id == task_ref.id)
        })
        .map(|task_ref| task_ref.id.clone())
        .collect();

    if lagging.is_empty() && job.is_complete() {
        return job
            .tasks
            .first()
            .map(|task_ref| task_ref.id.clone())
            .into_iter()
            .collect();
    }

    lagging
}

use shardwork_core::{AppError, AppResult};
use shardwork_domain::{JobStatus, TaskStatus};

use super::SchedulerDriver;
use crate::lease_service::LeaseHandle;

/// What one roll-up attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupOutcome {
    /// Another holder owns the job lease.
    Skipped,
    /// Some partitions are still open.
    Pending,
    /// The task and its job reference were already final.
    AlreadyFinal,
    /// The task was already final but its job lagged behind and was
    /// brought up to date.
    Reconciled {
        /// Whether the job moved to done.
        job_done: bool,
    },
    /// The task moved to done; `job_done` is set when it was the last one.
    TaskDone {
        /// Whether the job moved to done as well.
        job_done: bool,
    },
    /// Every partition is terminal and at least one failed.
    TaskFailed,
}

impl SchedulerDriver {
    /// Rolls one task's partition states up into the task and its job.
    ///
    /// Runs under a lease on the job, so concurrent drivers serialize and a
    /// task transitions at most once. A task that is already final still has
    /// its job reference and the job status brought in line, so a roll-up
    /// interrupted between writes completes on the next attempt.
    pub async fn rollup_task(&self, job_id: &str, task_id: &str) -> AppResult<RollupOutcome> {
        let Some(job_lease) = self
            .leases
            .acquire(&self.config.job_lease_group, job_id, false)
            .await?
        else {
            return Ok(RollupOutcome::Skipped);
        };

        let outcome = self.rollup_under_lease(&job_lease, job_id, task_id).await;
        let released = job_lease.release().await;
        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    async fn rollup_under_lease(
        &self,
        job_lease: &LeaseHandle,
        job_id: &str,
        task_id: &str,
    ) -> AppResult<RollupOutcome> {
        let task = self
            .jobs
            .find_task(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task '{task_id}' does not exist")))?;

        let (status, transitioned) = if task.status == TaskStatus::Available {
            let Some(next) = task.rollup_status() else {
                return Ok(RollupOutcome::Pending);
            };
            if self
                .jobs
                .transition_task_status(job_lease, job_id, task_id, TaskStatus::Available, next)
                .await?
            {
                (next, true)
            } else {
                let current = self.jobs.find_task(task_id).await?.map(|task| task.status);
                match current {
                    Some(status) if status != TaskStatus::Available => (status, false),
                    _ => return Ok(RollupOutcome::Pending),
                }
            }
        } else {
            (task.status, false)
        };

        let mut job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job '{job_id}' does not exist")))?;

        let mut synced = false;
        let lagging = job
            .task_position(task_id)
            .filter(|position| job.tasks[*position].status != status);
        if let Some(position) = lagging {
            self.jobs
                .set_job_task_status(job_lease, job_id, position, status)
                .await?;
            job.tasks[position].status = status;
            synced = true;
        }

        let job_done = job.status == JobStatus::Available
            && job.is_complete()
            && self
                .jobs
                .transition_job_status(job_lease, job_id, JobStatus::Available, JobStatus::Done)
                .await?;

        Ok(match (transitioned, status) {
            (true, TaskStatus::Done) => RollupOutcome::TaskDone { job_done },
            (true, _) => RollupOutcome::TaskFailed,
            (false, _) if synced || job_done => RollupOutcome::Reconciled { job_done },
            (false, _) => RollupOutcome::AlreadyFinal,
        })
    }
}

use std::sync::Arc;

use serde_json::Value;
use shardwork_core::{AppError, AppResult};
use shardwork_domain::{
    DocumentKey, Filter, Job, JobStatus, Partition, PartitionStatus, Task, TaskStatus, Update,
};
use tracing::info;

use crate::lease_service::LeaseHandle;
use crate::store_ports::{DocumentStore, decode_document, encode_document};

const PAGE_SIZE: usize = 100;

/// Typed persistence for jobs, tasks and partitions.
///
/// Every status mutation takes the [`LeaseHandle`] that authorizes it: the
/// partition lease for partition writes, the job lease for task and job
/// roll-up writes.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn DocumentStore>,
    jobs_collection: String,
    tasks_collection: String,
}

impl JobStore {
    /// Creates a job store over the given collections.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        jobs_collection: impl Into<String>,
        tasks_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            jobs_collection: jobs_collection.into(),
            tasks_collection: tasks_collection.into(),
        }
    }

    /// Persists a job and its tasks. Tasks are written first so a visible
    /// job always references existing tasks.
    pub async fn submit_job(&self, job: &Job, tasks: &[Task]) -> AppResult<()> {
        for task_ref in &job.tasks {
            if !tasks.iter().any(|task| task.id == task_ref.id) {
                return Err(AppError::Validation(format!(
                    "job '{}' references unknown task '{}'",
                    job.id, task_ref.id
                )));
            }
        }

        for task in tasks {
            if task.job_id != job.id {
                return Err(AppError::Validation(format!(
                    "task '{}' belongs to job '{}', not '{}'",
                    task.id, task.job_id, job.id
                )));
            }

            self.store
                .insert_one(
                    &self.tasks_collection,
                    encode_document(&self.tasks_collection, task)?,
                )
                .await?;
        }

        self.store
            .insert_one(
                &self.jobs_collection,
                encode_document(&self.jobs_collection, job)?,
            )
            .await?;

        info!(
            job_id = %job.id,
            ambit = %job.ambit,
            tasks = tasks.len(),
            "job submitted"
        );
        Ok(())
    }

    /// Lists available jobs in the given ambits, or in every ambit when empty.
    pub async fn find_available_jobs(&self, ambits: &[String]) -> AppResult<Vec<Job>> {
        let mut filter = Filter::new().eq("status", JobStatus::Available.as_str());
        if !ambits.is_empty() {
            filter = filter.is_in(
                "ambit",
                ambits.iter().map(|ambit| Value::from(ambit.as_str())).collect(),
            );
        }

        self.find_all(&self.jobs_collection, filter).await
    }

    /// Lists a job's tasks with the given status.
    pub async fn find_tasks(&self, job_id: &str, status: TaskStatus) -> AppResult<Vec<Task>> {
        let filter = Filter::new()
            .eq("job_id", job_id)
            .eq("status", status.as_str());
        self.find_all(&self.tasks_collection, filter).await
    }

    /// Returns one job.
    pub async fn find_job(&self, job_id: &str) -> AppResult<Option<Job>> {
        self.find_by_key(&self.jobs_collection, job_id).await
    }

    /// Returns one task.
    pub async fn find_task(&self, task_id: &str) -> AppResult<Option<Task>> {
        self.find_by_key(&self.tasks_collection, task_id).await
    }

    /// Sets one partition's status under its lease.
    pub async fn set_partition_status(
        &self,
        lease: &LeaseHandle,
        task_id: &str,
        number: u32,
        status: PartitionStatus,
    ) -> AppResult<bool> {
        require_lease(lease, &Partition::id_for(task_id, number))?;
        let update =
            Update::new().set(Task::partition_field(number, "status"), status.as_str());
        self.update_task(task_id, Filter::new(), update).await
    }

    /// Counts one acquisition of a partition under its lease.
    pub async fn record_partition_acquisition(
        &self,
        lease: &LeaseHandle,
        task_id: &str,
        number: u32,
    ) -> AppResult<bool> {
        require_lease(lease, &Partition::id_for(task_id, number))?;
        let update = Update::new().inc(Task::partition_field(number, "acquisitions"), 1);
        self.update_task(task_id, Filter::new(), update).await
    }

    /// Counts one processing failure on a partition and its task.
    pub async fn record_partition_error(
        &self,
        lease: &LeaseHandle,
        task_id: &str,
        number: u32,
    ) -> AppResult<bool> {
        require_lease(lease, &Partition::id_for(task_id, number))?;
        let update = Update::new()
            .inc(Task::partition_field(number, "errors"), 1)
            .inc("errors", 1);
        self.update_task(task_id, Filter::new(), update).await
    }

    /// Moves a task from `from` to `to` under the job lease.
    ///
    /// Returns false when the task was no longer in `from`, so concurrent
    /// roll-ups transition a task at most once.
    pub async fn transition_task_status(
        &self,
        job_lease: &LeaseHandle,
        job_id: &str,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> AppResult<bool> {
        require_lease(job_lease, job_id)?;
        let filter = Filter::new()
            .eq("job_id", job_id)
            .eq("status", from.as_str());
        self.update_task(task_id, filter, Update::new().set("status", to.as_str()))
            .await
    }

    /// Sets the status of one embedded task reference under the job lease.
    pub async fn set_job_task_status(
        &self,
        job_lease: &LeaseHandle,
        job_id: &str,
        position: usize,
        status: TaskStatus,
    ) -> AppResult<bool> {
        require_lease(job_lease, job_id)?;
        let update = Update::new().set(format!("tasks.{position}.status"), status.as_str());
        self.update_job(job_id, Filter::new(), update).await
    }

    /// Moves a job from `from` to `to` under the job lease.
    pub async fn transition_job_status(
        &self,
        job_lease: &LeaseHandle,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> AppResult<bool> {
        require_lease(job_lease, job_id)?;
        let filter = Filter::new().eq("status", from.as_str());
        self.update_job(job_id, filter, Update::new().set("status", to.as_str()))
            .await
    }

    async fn update_task(&self, task_id: &str, filter: Filter, update: Update) -> AppResult<bool> {
        let filter = filter.eq("_id", task_id);
        Ok(self
            .store
            .update_one(&self.tasks_collection, &filter, &update)
            .await?
            > 0)
    }

    async fn update_job(&self, job_id: &str, filter: Filter, update: Update) -> AppResult<bool> {
        let filter = filter.eq("_id", job_id);
        Ok(self
            .store
            .update_one(&self.jobs_collection, &filter, &update)
            .await?
            > 0)
    }

    async fn find_by_key<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> AppResult<Option<T>> {
        self.store
            .find_one(collection, &Filter::by_key(&DocumentKey::from(id)))
            .await?
            .map(|document| decode_document(collection, document))
            .transpose()
    }

    async fn find_all<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        filter: Filter,
    ) -> AppResult<Vec<T>> {
        let mut documents = Vec::new();
        let mut last_key: Option<DocumentKey> = None;

        loop {
            let page_filter = match &last_key {
                Some(key) => filter.clone().gt("_id", key.to_value()),
                None => filter.clone(),
            };
            let page = self
                .store
                .find_range(collection, &page_filter, PAGE_SIZE)
                .await?;
            let page_len = page.len();

            for document in page {
                last_key = DocumentKey::of_document(&document);
                documents.push(decode_document(collection, document)?);
            }

            if page_len < PAGE_SIZE || last_key.is_none() {
                return Ok(documents);
            }
        }
    }
}

fn require_lease(lease: &LeaseHandle, object_id: &str) -> AppResult<()> {
    if lease.object_id() != object_id {
        return Err(AppError::Validation(format!(
            "lease on '{}' does not authorize writes to '{object_id}'",
            lease.object_id()
        )));
    }

    if lease.is_lost() {
        return Err(AppError::OwnershipLost(format!(
            "lease on '{object_id}' was lost"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests;

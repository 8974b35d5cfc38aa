use std::sync::Arc;

use shardwork_core::{AppError, HolderId};
use shardwork_domain::{Job, JobStatus, PartitionStatus, StreamType, TaskStatus};

use super::JobStore;
use crate::lease_service::LeaseManager;
use crate::store_ports::DocumentStore;
use crate::test_support::{FakeDocumentStore, region_templates, sample_task};

fn stores() -> (Arc<FakeDocumentStore>, JobStore, LeaseManager) {
    let store = Arc::new(FakeDocumentStore::default());
    let dyn_store: Arc<dyn DocumentStore> = store.clone();
    let jobs = JobStore::new(dyn_store.clone(), "jobs", "tasks");
    let leases = LeaseManager::new(
        dyn_store,
        "leases",
        HolderId::new("driver-a").unwrap_or_else(|_| unreachable!()),
        30,
    );
    (store, jobs, leases)
}

async fn submit(jobs: &JobStore, job_id: &str, ambit: &str) {
    let task = sample_task(
        &format!("{job_id}-orders"),
        job_id,
        "orders",
        region_templates(&["eu", "us"]),
        StreamType::Finite,
    );
    let job = Job::new(job_id, ambit, JobStatus::Available, std::slice::from_ref(&task))
        .unwrap_or_else(|_| unreachable!());
    assert!(jobs.submit_job(&job, &[task]).await.is_ok());
}

#[tokio::test]
async fn discovers_available_jobs_by_ambit() {
    let (_, jobs, _) = stores();
    submit(&jobs, "job-1", "billing").await;
    submit(&jobs, "job-2", "search").await;

    let billing = jobs
        .find_available_jobs(&["billing".to_owned()])
        .await
        .unwrap_or_default();
    assert_eq!(billing.len(), 1);
    assert_eq!(billing[0].id, "job-1");

    let every = jobs.find_available_jobs(&[]).await.unwrap_or_default();
    assert_eq!(every.len(), 2);

    let tasks = jobs
        .find_tasks("job-2", TaskStatus::Available)
        .await
        .unwrap_or_default();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].partitions.len(), 2);
}

#[tokio::test]
async fn duplicate_submission_conflicts() {
    let (_, jobs, _) = stores();
    submit(&jobs, "job-1", "billing").await;

    let task = sample_task(
        "job-1-orders",
        "job-1",
        "orders",
        region_templates(&["eu"]),
        StreamType::Finite,
    );
    let job = Job::new("job-1", "billing", JobStatus::Available, std::slice::from_ref(&task))
        .unwrap_or_else(|_| unreachable!());
    assert!(matches!(
        jobs.submit_job(&job, &[task]).await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn partition_writes_require_the_partition_lease() {
    let (_, jobs, leases) = stores();
    submit(&jobs, "job-1", "billing").await;

    let wrong = leases
        .acquire("job-1-orders", "job-1-orders:0", false)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| unreachable!());
    let rejected = jobs
        .set_partition_status(&wrong, "job-1-orders", 1, PartitionStatus::Eof)
        .await;
    assert!(matches!(rejected, Err(AppError::Validation(_))));

    let updated = jobs
        .set_partition_status(&wrong, "job-1-orders", 0, PartitionStatus::Eof)
        .await;
    assert!(matches!(updated, Ok(true)));
    assert!(jobs
        .record_partition_error(&wrong, "job-1-orders", 0)
        .await
        .unwrap_or(false));

    let task = jobs
        .find_task("job-1-orders")
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| unreachable!());
    assert_eq!(task.partitions[0].status, PartitionStatus::Eof);
    assert_eq!(task.partitions[0].errors, 1);
    assert_eq!(task.errors, 1);
    assert_eq!(task.partitions[1].status, PartitionStatus::Available);
}

#[tokio::test]
async fn task_transition_happens_once() {
    let (_, jobs, leases) = stores();
    submit(&jobs, "job-1", "billing").await;
    let job_lease = leases
        .acquire("jobs", "job-1", false)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| unreachable!());

    let first = jobs
        .transition_task_status(
            &job_lease,
            "job-1",
            "job-1-orders",
            TaskStatus::Available,
            TaskStatus::Done,
        )
        .await;
    let second = jobs
        .transition_task_status(
            &job_lease,
            "job-1",
            "job-1-orders",
            TaskStatus::Available,
            TaskStatus::Done,
        )
        .await;
    assert!(matches!(first, Ok(true)));
    assert!(matches!(second, Ok(false)));

    assert!(jobs
        .set_job_task_status(&job_lease, "job-1", 0, TaskStatus::Done)
        .await
        .unwrap_or(false));
    assert!(jobs
        .transition_job_status(&job_lease, "job-1", JobStatus::Available, JobStatus::Done)
        .await
        .unwrap_or(false));

    let job = jobs
        .find_job("job-1")
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| unreachable!());
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.tasks[0].status, TaskStatus::Done);
    assert!(jobs
        .find_available_jobs(&[])
        .await
        .unwrap_or_default()
        .is_empty());
}

use serde::{Deserialize, Serialize};
use shardwork_core::{AppError, AppResult};

use crate::task::{StreamType, Task, TaskStatus};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is due and its tasks can be scheduled.
    Available,
    /// Job is not due yet.
    Waiting,
    /// Every finite task is done. Terminal.
    Done,
}

impl JobStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Waiting => "waiting",
            Self::Done => "done",
        }
    }
}

/// Reference from a job to one of its tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Task identifier.
    pub id: String,
    /// Last rolled-up task status.
    pub status: TaskStatus,
    /// Stream type, used to exclude infinite tasks from completion.
    #[serde(default)]
    pub stream_type: StreamType,
}

/// A unit of work submitted once and split into tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Classification used when polling for work.
    pub ambit: String,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Ordered task references.
    pub tasks: Vec<TaskRef>,
}

impl Job {
    /// Creates a job referencing the given tasks.
    pub fn new(
        id: impl Into<String>,
        ambit: impl Into<String>,
        status: JobStatus,
        tasks: &[Task],
    ) -> AppResult<Self> {
        let id = id.into();
        if id.trim().is_empty() || id.contains('/') {
            return Err(AppError::Validation(format!(
                "job id '{id}' must be non-empty and must not contain '/'"
            )));
        }

        if let Some(task) = tasks.iter().find(|task| task.job_id != id) {
            return Err(AppError::Validation(format!(
                "task '{}' belongs to job '{}', not '{id}'",
                task.id, task.job_id
            )));
        }

        Ok(Self {
            id,
            ambit: ambit.into(),
            status,
            tasks: tasks
                .iter()
                .map(|task| TaskRef {
                    id: task.id.clone(),
                    status: task.status,
                    stream_type: task.stream_type,
                })
                .collect(),
        })
    }

    /// Returns the position of one task reference.
    #[must_use]
    pub fn task_position(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == task_id)
    }

    /// Returns true when every finite task is done.
    ///
    /// A job without finite tasks never completes.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let mut finite = self
            .tasks
            .iter()
            .filter(|task| task.stream_type == StreamType::Finite)
            .peekable();

        finite.peek().is_some() && finite.all(|task| task.status == TaskStatus::Done)
    }
}

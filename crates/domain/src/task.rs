use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shardwork_core::{AppError, AppResult};

use crate::query::FilterTemplate;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task still has partitions to process.
    Available,
    /// Every partition reached EOF.
    Done,
    /// Every partition is terminal and at least one failed permanently.
    Error,
}

impl TaskStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "available" => Ok(Self::Available),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err(AppError::Validation(format!(
                "unknown task status '{value}'"
            ))),
        }
    }
}

/// Whether a task's source ever runs dry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    /// Partitions reach EOF and the task completes.
    #[default]
    Finite,
    /// Partitions are polled forever; EOF only means "caught up".
    Infinite,
}

/// Partition lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Partition can be acquired.
    Available,
    /// Partition was closed externally and is not scanned. Not terminal:
    /// a task holding a closed partition stays available and never rolls
    /// up until the partition is reopened.
    Closed,
    /// Finite partition scanned to the end.
    Eof,
    /// Partition exhausted its restarts.
    Error,
}

impl PartitionStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Closed => "closed",
            Self::Eof => "eof",
            Self::Error => "error",
        }
    }

    /// Returns true when the partition will not be scanned again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Eof | Self::Error)
    }
}

/// Task-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProperties {
    /// Source collection scanned by every partition.
    pub collection: String,
    /// Failures tolerated per partition before it is marked `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    /// Page size override for this task's cursors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    /// Free-form settings read by document processors.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Smallest leasable, streamable unit of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Stable identifier, `"<task_id>:<number>"`.
    pub id: String,
    /// Position inside the task's partition list.
    pub number: u32,
    /// Lifecycle status.
    pub status: PartitionStatus,
    /// Query template with a resume-key placeholder.
    pub filter_template: FilterTemplate,
    /// Processing failures recorded for this partition.
    #[serde(default)]
    pub errors: i64,
    /// Times this partition was acquired by a worker.
    #[serde(default)]
    pub acquisitions: i64,
}

impl Partition {
    /// Returns the identifier of partition `number` in `task_id`.
    #[must_use]
    pub fn id_for(task_id: &str, number: u32) -> String {
        format!("{task_id}:{number}")
    }
}

/// One parallel unit of a job, bound to one source collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Owning job.
    pub job_id: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Finite or infinite source.
    #[serde(default)]
    pub stream_type: StreamType,
    /// Task-level settings.
    pub properties: TaskProperties,
    /// Partitions ordered by number; index equals partition number.
    pub partitions: Vec<Partition>,
    /// Processing failures across all partitions.
    #[serde(default)]
    pub errors: i64,
}

impl Task {
    /// Creates an available task with one partition per template.
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        stream_type: StreamType,
        properties: TaskProperties,
        templates: Vec<FilterTemplate>,
    ) -> AppResult<Self> {
        let id = id.into();
        let job_id = job_id.into();

        if id.trim().is_empty() || id.contains('/') {
            return Err(AppError::Validation(format!(
                "task id '{id}' must be non-empty and must not contain '/'"
            )));
        }

        if properties.collection.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "task '{id}' must name a source collection"
            )));
        }

        if templates.is_empty() {
            return Err(AppError::Validation(format!(
                "task '{id}' must have at least one partition"
            )));
        }

        let partitions = templates
            .into_iter()
            .enumerate()
            .map(|(index, filter_template)| {
                let number = u32::try_from(index).map_err(|error| {
                    AppError::Validation(format!("too many partitions for task '{id}': {error}"))
                })?;
                Ok(Partition {
                    id: Partition::id_for(id.as_str(), number),
                    number,
                    status: PartitionStatus::Available,
                    filter_template,
                    errors: 0,
                    acquisitions: 0,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            id,
            job_id,
            status: TaskStatus::Available,
            stream_type,
            properties,
            partitions,
            errors: 0,
        })
    }

    /// Returns one partition by number.
    #[must_use]
    pub fn partition(&self, number: u32) -> Option<&Partition> {
        self.partitions
            .get(usize::try_from(number).ok()?)
            .filter(|partition| partition.number == number)
    }

    /// Returns the document path of one partition field.
    #[must_use]
    pub fn partition_field(number: u32, field: &str) -> String {
        format!("partitions.{number}.{field}")
    }

    /// Returns the status roll-up should move this task to, if any.
    ///
    /// Infinite tasks never complete through EOF, and a closed partition
    /// holds the task open.
    #[must_use]
    pub fn rollup_status(&self) -> Option<TaskStatus> {
        if self.stream_type == StreamType::Infinite || self.status != TaskStatus::Available {
            return None;
        }

        if self
            .partitions
            .iter()
            .all(|partition| partition.status == PartitionStatus::Eof)
        {
            return Some(TaskStatus::Done);
        }

        let all_terminal = self
            .partitions
            .iter()
            .all(|partition| partition.status.is_terminal());
        let any_failed = self
            .partitions
            .iter()
            .any(|partition| partition.status == PartitionStatus::Error);

        (all_terminal && any_failed).then_some(TaskStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::{PartitionStatus, StreamType, Task, TaskProperties, TaskStatus};
    use crate::query::FilterTemplate;

    fn three_partition_task(stream_type: StreamType) -> Task {
        Task::new(
            "orders",
            "job-1",
            stream_type,
            TaskProperties {
                collection: "orders".to_owned(),
                ..TaskProperties::default()
            },
            vec![FilterTemplate::keyset(); 3],
        )
        .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn partitions_are_numbered_by_position() {
        let task = three_partition_task(StreamType::Finite);
        let ids: Vec<&str> = task.partitions.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["orders:0", "orders:1", "orders:2"]);
        assert_eq!(task.partition(2).map(|p| p.number), Some(2));
        assert!(task.partition(3).is_none());
    }

    #[test]
    fn task_with_available_partition_is_not_done() {
        let mut task = three_partition_task(StreamType::Finite);
        task.partitions[0].status = PartitionStatus::Eof;
        task.partitions[1].status = PartitionStatus::Eof;
        assert_eq!(task.rollup_status(), None);

        task.partitions[2].status = PartitionStatus::Eof;
        assert_eq!(task.rollup_status(), Some(TaskStatus::Done));
    }

    #[test]
    fn failed_partition_rolls_task_into_error() {
        let mut task = three_partition_task(StreamType::Finite);
        task.partitions[0].status = PartitionStatus::Eof;
        task.partitions[1].status = PartitionStatus::Error;
        assert_eq!(task.rollup_status(), None);

        task.partitions[2].status = PartitionStatus::Eof;
        assert_eq!(task.rollup_status(), Some(TaskStatus::Error));
    }

    #[test]
    fn closed_partition_holds_task_open() {
        let mut task = three_partition_task(StreamType::Finite);
        task.partitions[0].status = PartitionStatus::Eof;
        task.partitions[1].status = PartitionStatus::Closed;
        task.partitions[2].status = PartitionStatus::Error;
        assert_eq!(task.rollup_status(), None);

        task.partitions[1].status = PartitionStatus::Eof;
        assert_eq!(task.rollup_status(), Some(TaskStatus::Error));
    }

    #[test]
    fn infinite_task_never_completes() {
        let mut task = three_partition_task(StreamType::Infinite);
        for partition in &mut task.partitions {
            partition.status = PartitionStatus::Eof;
        }
        assert_eq!(task.rollup_status(), None);
    }

    #[test]
    fn task_requires_partitions_and_collection() {
        let no_partitions = Task::new(
            "t",
            "j",
            StreamType::Finite,
            TaskProperties {
                collection: "c".to_owned(),
                ..TaskProperties::default()
            },
            Vec::new(),
        );
        assert!(no_partitions.is_err());

        let no_collection = Task::new(
            "t",
            "j",
            StreamType::Finite,
            TaskProperties::default(),
            vec![FilterTemplate::keyset()],
        );
        assert!(no_collection.is_err());
    }
}

//! Domain documents and invariants for the partitioned job scheduler.

#![forbid(unsafe_code)]

mod job;
mod lease;
mod query;
mod task;

pub use job::{Job, JobStatus, TaskRef};
pub use lease::{
    LEASE_PARTITION_STATUS_KEY, LEASE_RESUME_KEY, Lease, LeaseData, LeaseStatus, LeaseValue,
};
pub use query::{
    Comparison, DocumentKey, FieldPredicate, Filter, FilterTemplate, KEY_FIELD, TemplatePredicate,
    TemplateValue, Update, UpdateOperation, lookup_path,
};
pub use task::{
    Partition, PartitionStatus, StreamType, Task, TaskProperties, TaskStatus,
};

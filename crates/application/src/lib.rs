//! Scheduling services and the ports they depend on.

#![forbid(unsafe_code)]

mod job_store;
mod lease_service;
mod partition_cursor;
mod partition_worker;
mod scheduler_config;
mod scheduler_driver;
mod scheduler_stats;
mod store_ports;

#[cfg(test)]
mod test_support;

pub use job_store::JobStore;
pub use lease_service::{LeaseHandle, LeaseManager};
pub use partition_cursor::{Boundary, CursorDocument, CursorEvent, PartitionCursor};
pub use partition_worker::PartitionWorker;
pub use scheduler_config::SchedulerConfig;
pub use scheduler_driver::{RollupOutcome, SchedulerDriver};
pub use scheduler_stats::{DriverStats, WorkerStats};
pub use store_ports::{
    DocumentProcessor, DocumentStore, ProcessingContext, decode_document, encode_document,
};

use std::time::Duration;

use shardwork_core::{AppError, AppResult, HolderId};

/// Settings consumed by the scheduler driver and its workers.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Job ambits this process polls; empty polls every ambit.
    pub ambits: Vec<String>,
    /// Interval between discovery passes.
    pub tick_interval: Duration,
    /// Stop once a discovery pass finds nothing and no worker is running.
    pub exit_on_idle: bool,
    /// Stop discovering after this many passes.
    pub max_iterations: Option<u64>,
    /// Consecutive failed discovery passes tolerated before the driver gives up.
    pub max_discovery_failures: u32,
    /// Documents loaded per cursor page.
    pub batch_size: usize,
    /// Documents processed between resume-key commits.
    pub commit_every: usize,
    /// Lease time to live in seconds.
    pub lease_duration_seconds: u32,
    /// Fraction of the TTL after which auto-renewal ticks.
    pub renew_fraction: f64,
    /// Partition failures tolerated when a task does not set its own limit.
    pub max_restarts: u32,
    /// Identity written on acquired leases.
    pub holder_id: HolderId,
    /// Collection holding job documents.
    pub jobs_collection: String,
    /// Collection holding task documents.
    pub tasks_collection: String,
    /// Collection holding lease documents.
    pub leases_collection: String,
    /// Lease group used to serialize job roll-ups.
    pub job_lease_group: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ambits: Vec::new(),
            tick_interval: Duration::from_secs(5),
            exit_on_idle: false,
            max_iterations: None,
            max_discovery_failures: 3,
            batch_size: 100,
            commit_every: 50,
            lease_duration_seconds: 60,
            renew_fraction: 0.6,
            max_restarts: 3,
            holder_id: HolderId::generate("shardwork"),
            jobs_collection: "jobs".to_owned(),
            tasks_collection: "tasks".to_owned(),
            leases_collection: "leases".to_owned(),
            job_lease_group: "jobs".to_owned(),
        }
    }
}

impl SchedulerConfig {
    /// Checks value ranges and returns the config unchanged when valid.
    pub fn validate(self) -> AppResult<Self> {
        if self.tick_interval.is_zero() {
            return Err(AppError::Validation(
                "tick_interval must be greater than zero".to_owned(),
            ));
        }

        if self.batch_size == 0 {
            return Err(AppError::Validation(
                "batch_size must be greater than zero".to_owned(),
            ));
        }

        if self.commit_every == 0 {
            return Err(AppError::Validation(
                "commit_every must be greater than zero".to_owned(),
            ));
        }

        if self.lease_duration_seconds == 0 {
            return Err(AppError::Validation(
                "lease_duration_seconds must be greater than zero".to_owned(),
            ));
        }

        if !(self.renew_fraction > 0.0 && self.renew_fraction < 1.0) {
            return Err(AppError::Validation(format!(
                "renew_fraction must be between 0 and 1, got {}",
                self.renew_fraction
            )));
        }

        if self.max_discovery_failures == 0 {
            return Err(AppError::Validation(
                "max_discovery_failures must be greater than zero".to_owned(),
            ));
        }

        for (name, value) in [
            ("jobs_collection", &self.jobs_collection),
            ("tasks_collection", &self.tasks_collection),
            ("leases_collection", &self.leases_collection),
            ("job_lease_group", &self.job_lease_group),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!("{name} must not be empty")));
            }
        }

        if let Some(ambit) = self.ambits.iter().find(|ambit| ambit.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "ambit '{ambit}' must not be blank"
            )));
        }

        Ok(self)
    }
}

/// Counters reported by one partition worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Documents handed to the processor.
    pub documents: u64,
    /// Processing or store failures.
    pub errors: u64,
    /// Resume-key commits written into leases.
    pub lease_commits: u64,
    /// Partitions this worker acquired.
    pub partitions_acquired: u64,
    /// Finite partitions this worker scanned to EOF.
    pub partitions_completed: u64,
    /// Infinite partitions this worker caught up with.
    pub partitions_caught_up: u64,
    /// Partitions this worker marked `error`.
    pub partitions_failed: u64,
    /// Partition leases lost to another holder mid-scan.
    pub leases_lost: u64,
}

impl WorkerStats {
    /// Adds another worker's counters to this one.
    pub fn merge(&mut self, other: &Self) {
        self.documents += other.documents;
        self.errors += other.errors;
        self.lease_commits += other.lease_commits;
        self.partitions_acquired += other.partitions_acquired;
        self.partitions_completed += other.partitions_completed;
        self.partitions_caught_up += other.partitions_caught_up;
        self.partitions_failed += other.partitions_failed;
        self.leases_lost += other.leases_lost;
    }
}

/// Counters reported by one scheduler driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Discovery passes performed.
    pub iterations: u64,
    /// Workers spawned.
    pub tasks_dispatched: u64,
    /// Tasks this driver rolled up to `done`.
    pub tasks_done: u64,
    /// Tasks this driver rolled up to `error`.
    pub tasks_failed: u64,
    /// Jobs this driver rolled up to `done`.
    pub jobs_done: u64,
    /// Roll-ups skipped because another driver held the job lease.
    pub rollups_skipped: u64,
    /// Sum of every finished worker's counters.
    pub workers: WorkerStats,
}

//! Database configuration.

use std::time::Duration;

use kvsql_result::{Error, Result};
use kvsql_sched::{SchedulerConfig, SchedulerKind};

use crate::transaction::CommitResponseKind;

/// Key distribution hint threaded through to scan planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyDistribution {
    #[default]
    Simple,
    Uniform,
}

/// Recognized configuration options.
///
/// Defaults aim at a mid-size multi-core host; every field can be overridden
/// before `start`. The core-assignment group (`core_affinity`,
/// `initial_core`, `assign_numa_nodes_uniformly`, `force_numa_node`) is
/// validated at start and violations abort with an I/O-classified error.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Worker thread count for the task scheduler.
    pub thread_pool_size: usize,
    /// Use the single-threaded serial scheduler (testing / quiesce).
    pub single_thread: bool,
    /// Allow idle workers to steal queued tasks.
    pub stealing_enabled: bool,
    /// Run lightweight jobs inline on the submitting thread.
    pub enable_hybrid_scheduler: bool,
    /// Spin instead of suspending between worker polls.
    pub busy_worker: bool,
    /// Poll interval of the conditional-task watcher.
    pub watcher_interval: Duration,
    /// Spin-yield attempts before a worker suspends.
    pub worker_try_count: u32,
    pub worker_suspend_timeout: Duration,
    /// Pacing between steal attempts (scheduler hint).
    pub stealing_wait: u32,
    /// Pacing between task queue polls (scheduler hint).
    pub task_polling_wait: u32,
    pub use_preferred_worker_for_current_thread: bool,
    /// Per-mille probability of checking the local queue first.
    pub thousandths_ratio_check_local_first: u32,

    /// Default parallelism of relational operators.
    pub default_partitions: u32,
    /// Plans with work level at or below this run inline under the hybrid
    /// scheduler.
    pub lightweight_job_level: u32,
    /// Records emitted by a scan task before yielding.
    pub scan_block_size: usize,
    /// Wall-clock bound on one scan slice.
    pub scan_yield_interval: Duration,
    pub scan_default_parallel: u32,

    /// Fallback commit-response kind when the request leaves it undefined.
    pub default_commit_response: CommitResponseKind,
    /// Accumulate per-transaction commit profiles into the global stats.
    pub profile_commits: bool,
    /// Return freed memory pages to the OS (advisory).
    pub return_os_pages: bool,
    /// Skip durability-callback dispatch when the waitlist is empty.
    pub omit_task_when_idle: bool,
    /// Bound on concurrent result-set writers.
    pub max_result_set_writers: u32,
    /// Emit `stmt_explain` external-log events.
    pub plan_recording: bool,
    /// Fold unquoted SQL identifiers to lower case.
    pub lowercase_regular_identifiers: bool,
    /// System time-zone offset in minutes.
    pub zone_offset: i32,

    /// Pin workers to consecutive cores starting at `initial_core`.
    pub core_affinity: bool,
    pub initial_core: usize,
    /// Spread workers uniformly across NUMA nodes.
    pub assign_numa_nodes_uniformly: bool,
    /// Pin all workers to one NUMA node.
    pub force_numa_node: Option<u32>,

    // Development toggles, threaded through to the relevant subsystem.
    pub update_skips_deletion: bool,
    pub try_insert_on_upserting_secondary: bool,
    pub scan_concurrent_operation_as_not_found: bool,
    pub point_read_concurrent_operation_as_not_found: bool,
    /// Run commit callbacks directly on the engine's callback thread.
    pub direct_commit_callback: bool,
    /// Arm job teardown inline instead of submitting a teardown task.
    pub inplace_teardown: bool,
    pub enable_blob_cast: bool,
    pub enable_index_join: bool,
    pub enable_join_scan: bool,
    pub key_distribution: KeyDistribution,

    /// Storage-engine location, used when no engine is injected.
    pub location: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            single_thread: false,
            stealing_enabled: true,
            enable_hybrid_scheduler: true,
            busy_worker: false,
            watcher_interval: Duration::from_millis(1),
            worker_try_count: 64,
            worker_suspend_timeout: Duration::from_millis(10),
            stealing_wait: 1,
            task_polling_wait: 0,
            use_preferred_worker_for_current_thread: true,
            thousandths_ratio_check_local_first: 100,
            default_partitions: 5,
            lightweight_job_level: 0,
            scan_block_size: 100,
            scan_yield_interval: Duration::from_millis(1),
            scan_default_parallel: 1,
            default_commit_response: CommitResponseKind::Stored,
            profile_commits: false,
            return_os_pages: false,
            omit_task_when_idle: true,
            max_result_set_writers: 64,
            plan_recording: false,
            lowercase_regular_identifiers: false,
            zone_offset: 0,
            core_affinity: false,
            initial_core: 0,
            assign_numa_nodes_uniformly: false,
            force_numa_node: None,
            update_skips_deletion: false,
            try_insert_on_upserting_secondary: false,
            scan_concurrent_operation_as_not_found: true,
            point_read_concurrent_operation_as_not_found: true,
            direct_commit_callback: false,
            inplace_teardown: true,
            enable_blob_cast: false,
            enable_index_join: true,
            enable_join_scan: true,
            key_distribution: KeyDistribution::default(),
            location: "memory".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Validate the core-assignment option group.
    ///
    /// Mutual exclusions: `core_affinity` cannot be combined with either NUMA
    /// option; `force_numa_node` cannot be combined with
    /// `assign_numa_nodes_uniformly`. With `core_affinity`, the pinned range
    /// must fit the hardware.
    pub fn validate_core_assignment(&self) -> Result<()> {
        if self.core_affinity && (self.assign_numa_nodes_uniformly || self.force_numa_node.is_some())
        {
            return Err(Error::io_message(
                "core_affinity is mutually exclusive with NUMA node assignment options",
            ));
        }
        if self.force_numa_node.is_some() && self.assign_numa_nodes_uniformly {
            return Err(Error::io_message(
                "force_numa_node is mutually exclusive with assign_numa_nodes_uniformly",
            ));
        }
        if self.core_affinity {
            let hardware = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            if self.initial_core + self.thread_pool_size > hardware {
                return Err(Error::io_message(format!(
                    "invalid core assignment: initial_core {} + thread_pool_size {} exceeds hardware concurrency {}",
                    self.initial_core, self.thread_pool_size, hardware
                )));
            }
        }
        Ok(())
    }

    /// Scheduler selection and pacing derived from this configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let kind = if self.single_thread {
            SchedulerKind::Serial
        } else if self.enable_hybrid_scheduler {
            SchedulerKind::Hybrid
        } else {
            // Stealing is the base pool; `stealing_enabled=false` degrades to
            // the same pool without steal attempts mattering in practice
            // because submissions round-robin across workers.
            SchedulerKind::Stealing
        };
        SchedulerConfig {
            kind,
            thread_pool_size: self.thread_pool_size,
            watcher_interval: self.watcher_interval,
            worker_try_count: self.worker_try_count,
            worker_suspend_timeout: self.worker_suspend_timeout,
            busy_worker: self.busy_worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvsql_result::ErrorCode;

    #[test]
    fn test_default_passes_validation() {
        DatabaseConfig::default().validate_core_assignment().unwrap();
    }

    #[test]
    fn test_core_affinity_excludes_numa_options() {
        let config = DatabaseConfig {
            core_affinity: false,
            assign_numa_nodes_uniformly: true,
            force_numa_node: Some(0),
            ..Default::default()
        };
        let err = config.validate_core_assignment().unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);

        let config = DatabaseConfig {
            core_affinity: true,
            force_numa_node: Some(0),
            ..Default::default()
        };
        assert!(config.validate_core_assignment().is_err());
    }

    #[test]
    fn test_core_range_must_fit_hardware() {
        let config = DatabaseConfig {
            core_affinity: true,
            initial_core: usize::MAX / 2,
            ..Default::default()
        };
        assert!(config.validate_core_assignment().is_err());
    }

    #[test]
    fn test_scheduler_selection() {
        let serial = DatabaseConfig {
            single_thread: true,
            ..Default::default()
        };
        assert_eq!(serial.scheduler_config().kind, SchedulerKind::Serial);

        let stealing = DatabaseConfig {
            enable_hybrid_scheduler: false,
            ..Default::default()
        };
        assert_eq!(stealing.scheduler_config().kind, SchedulerKind::Stealing);

        assert_eq!(
            DatabaseConfig::default().scheduler_config().kind,
            SchedulerKind::Hybrid
        );
    }
}

//! Task scheduler for the kvsql SQL execution engine.
//!
//! The SQL core schedules all asynchronous work through this crate:
//!
//! - **[`Job`]**: unit of accounting and completion. A job carries a unique
//!   id, an optional completion callback, and an optional
//!   completion-readiness predicate that delays finalization until external
//!   callbacks have released their references. A job completes when it has
//!   been *armed* (its logical last task ran) and its in-flight task count
//!   drains to zero.
//! - **[`Task`]**: a closure tagged sticky / in-transaction / lightweight, or
//!   a conditional task that polls a predicate (with an optional
//!   cancellation probe) at watcher pacing before running its continuation.
//! - **[`TaskScheduler`]**: one of three pools fixed for a start/stop cycle —
//!   serial (one worker, used for tests and quiesce), work-stealing
//!   (per-worker deques, non-sticky tasks stealable), and hybrid (lightweight
//!   tasks run inline on the submitting thread).
//!
//! `wait_for_progress(job_id)` blocks the caller until the job completes,
//! which is how synchronous API variants are built from asynchronous ones.

pub mod job;
pub mod scheduler;
pub mod task;

pub use job::{Job, JobId};
pub use scheduler::{SchedulerConfig, SchedulerKind, TaskScheduler};
pub use task::Task;

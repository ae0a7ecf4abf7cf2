//! The three scheduler flavors and the shared worker machinery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::job::{Job, JobId};
use crate::task::{CancelProbe, ConditionPredicate, ConditionalContinuation, Task, TaskKind};

/// Which pool to run; fixed for the lifetime of one start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// One worker thread; used for tests and quiesced operation.
    Serial,
    /// Work-stealing pool over per-worker deques.
    Stealing,
    /// Stealing pool that runs lightweight tasks inline on the submitter.
    Hybrid,
}

/// Pacing and sizing knobs, extracted from the database configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    pub thread_pool_size: usize,
    /// Poll interval of the watcher that drives conditional tasks and
    /// readiness-delayed job finalization.
    pub watcher_interval: Duration,
    /// Spin-yield attempts before a worker suspends on the condvar.
    pub worker_try_count: u32,
    pub worker_suspend_timeout: Duration,
    /// Spin instead of suspending between polls.
    pub busy_worker: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::Stealing,
            thread_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            watcher_interval: Duration::from_millis(1),
            worker_try_count: 64,
            worker_suspend_timeout: Duration::from_millis(10),
            busy_worker: false,
        }
    }
}

struct WorkItem {
    job: Job,
    sticky: bool,
    body: Box<dyn FnOnce() + Send>,
}

struct ConditionalEntry {
    job: Job,
    predicate: ConditionPredicate,
    cancel: Option<CancelProbe>,
    continuation: Option<ConditionalContinuation>,
}

enum WatchEntry {
    Conditional(ConditionalEntry),
    /// Job armed and drained but its readiness predicate was false; poll it.
    Finalize(Job),
}

struct SchedState {
    queues: Vec<VecDeque<WorkItem>>,
    next_queue: usize,
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedState>,
    work_cond: Condvar,
    watch: Mutex<Vec<WatchEntry>>,
    jobs: Mutex<FxHashMap<JobId, Job>>,
    next_job_id: AtomicU64,
    started: AtomicBool,
    stopping: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let worker_count = match config.kind {
            SchedulerKind::Serial => 1,
            _ => config.thread_pool_size.max(1),
        };
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedState {
                    queues: (0..worker_count).map(|_| VecDeque::new()).collect(),
                    next_queue: 0,
                }),
                work_cond: Condvar::new(),
                watch: Mutex::new(Vec::new()),
                jobs: Mutex::new(FxHashMap::default()),
                next_job_id: AtomicU64::new(1),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
                watcher: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.inner.config.kind
    }

    /// Spawn workers and the watcher. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let worker_count = self
            .inner
            .state
            .lock()
            .expect("scheduler state lock poisoned")
            .queues
            .len();
        let mut workers = self
            .inner
            .workers
            .lock()
            .expect("scheduler workers lock poisoned");
        for index in 0..worker_count {
            let scheduler = self.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("kvsql-worker-{index}"))
                    .spawn(move || scheduler.worker_loop(index))
                    .expect("failed to spawn worker thread"),
            );
        }
        let scheduler = self.clone();
        *self
            .inner
            .watcher
            .lock()
            .expect("scheduler watcher lock poisoned") = Some(
            std::thread::Builder::new()
                .name("kvsql-watcher".to_string())
                .spawn(move || scheduler.watcher_loop())
                .expect("failed to spawn watcher thread"),
        );
        tracing::info!(
            "task scheduler started: kind={:?} workers={}",
            self.inner.config.kind,
            worker_count
        );
    }

    /// Drain queues and join all threads. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.work_cond.notify_all();
        let workers = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .expect("scheduler workers lock poisoned"),
        );
        for handle in workers {
            let _ = handle.join();
        }
        if let Some(handle) = self
            .inner
            .watcher
            .lock()
            .expect("scheduler watcher lock poisoned")
            .take()
        {
            let _ = handle.join();
        }
        tracing::info!("task scheduler stopped");
    }

    /// Create and register a job.
    pub fn register_job(&self) -> Job {
        let id = self.inner.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = Job::new(id);
        self.inner
            .jobs
            .lock()
            .expect("scheduler jobs lock poisoned")
            .insert(id, job.clone());
        job
    }

    pub fn unregister_job(&self, id: JobId) {
        self.inner
            .jobs
            .lock()
            .expect("scheduler jobs lock poisoned")
            .remove(&id);
    }

    /// Block until the job completes. A job id that is no longer registered
    /// has already completed.
    pub fn wait_for_progress(&self, id: JobId) {
        let job = self
            .inner
            .jobs
            .lock()
            .expect("scheduler jobs lock poisoned")
            .get(&id)
            .cloned();
        if let Some(job) = job {
            job.wait();
        }
    }

    /// Submit a task.
    pub fn submit(&self, task: Task) {
        let Task {
            job,
            kind,
            sticky,
            in_transaction: _,
            lightweight,
        } = task;
        match kind {
            TaskKind::Run(body) => {
                job.begin_task();
                let inline = matches!(self.inner.config.kind, SchedulerKind::Hybrid)
                    && lightweight
                    || self.inner.stopping.load(Ordering::SeqCst);
                if inline {
                    // Lightweight under the hybrid scheduler (or draining at
                    // stop): run on the submitting thread.
                    body();
                    if job.end_task() {
                        self.try_finalize(&job);
                    }
                } else {
                    self.push_item(WorkItem { job, sticky, body });
                }
            }
            TaskKind::Conditional {
                predicate,
                cancel,
                continuation,
            } => {
                job.begin_task();
                let mut entry = ConditionalEntry {
                    job,
                    predicate,
                    cancel,
                    continuation: Some(continuation),
                };
                if !self.fire_if_due(&mut entry) {
                    self.inner
                        .watch
                        .lock()
                        .expect("scheduler watch lock poisoned")
                        .push(WatchEntry::Conditional(entry));
                }
            }
        }
    }

    /// Run a closure inline under the job's task accounting; used for DDL,
    /// which never goes through the worker pool.
    pub fn execute_inline<T>(&self, job: &Job, body: impl FnOnce() -> T) -> T {
        job.begin_task();
        let out = body();
        if job.end_task() {
            self.try_finalize(job);
        }
        out
    }

    /// Arm the job and finalize it if it is already drained and ready.
    pub fn arm_job(&self, job: &Job) {
        job.arm_completion();
        self.try_finalize(job);
    }

    fn push_item(&self, item: WorkItem) {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("scheduler state lock poisoned");
        let queue_count = state.queues.len();
        let target = state.next_queue % queue_count;
        state.next_queue = state.next_queue.wrapping_add(1);
        state.queues[target].push_back(item);
        drop(state);
        self.inner.work_cond.notify_one();
    }

    fn run_item(&self, item: WorkItem) {
        (item.body)();
        if item.job.end_task() {
            self.try_finalize(&item.job);
        }
    }

    fn try_finalize(&self, job: &Job) {
        if job.completion_due() {
            job.finalize();
            self.unregister_job(job.id());
        } else if !job.readiness_satisfied() {
            // Armed and drained but held back by the readiness predicate:
            // hand it to the watcher instead of spinning a worker.
            self.inner
                .watch
                .lock()
                .expect("scheduler watch lock poisoned")
                .push(WatchEntry::Finalize(job.clone()));
        }
    }

    /// Returns true when the conditional entry fired (and was enqueued).
    fn fire_if_due(&self, entry: &mut ConditionalEntry) -> bool {
        let canceled = entry.cancel.as_ref().map(|probe| probe()).unwrap_or(false);
        if !canceled && !(entry.predicate)() {
            return false;
        }
        let continuation = entry
            .continuation
            .take()
            .expect("conditional continuation consumed twice");
        let job = entry.job.clone();
        self.push_item(WorkItem {
            job,
            sticky: false,
            body: Box::new(move || continuation(canceled)),
        });
        true
    }

    fn worker_loop(&self, index: usize) {
        let mut tries = self.inner.config.worker_try_count;
        loop {
            let item = {
                let mut state = self
                    .inner
                    .state
                    .lock()
                    .expect("scheduler state lock poisoned");
                Self::pop_item(&mut state, index)
            };
            if let Some(item) = item {
                self.run_item(item);
                tries = self.inner.config.worker_try_count;
                continue;
            }
            if self.inner.stopping.load(Ordering::SeqCst) {
                break;
            }
            if self.inner.config.busy_worker && tries > 0 {
                tries -= 1;
                std::thread::yield_now();
                continue;
            }
            let state = self
                .inner
                .state
                .lock()
                .expect("scheduler state lock poisoned");
            let _unused = self
                .inner
                .work_cond
                .wait_timeout(state, self.inner.config.worker_suspend_timeout)
                .expect("scheduler state lock poisoned");
            tries = self.inner.config.worker_try_count;
        }
        tracing::trace!("[SCHED] worker {} exiting", index);
    }

    fn pop_item(state: &mut SchedState, index: usize) -> Option<WorkItem> {
        if let Some(item) = state.queues[index].pop_front() {
            return Some(item);
        }
        // Steal from the back of another queue; sticky tasks stay put.
        let queue_count = state.queues.len();
        for offset in 1..queue_count {
            let victim = (index + offset) % queue_count;
            let stealable = state.queues[victim]
                .back()
                .map(|item| !item.sticky)
                .unwrap_or(false);
            if stealable {
                return state.queues[victim].pop_back();
            }
        }
        None
    }

    fn watcher_loop(&self) {
        while !self.inner.stopping.load(Ordering::SeqCst) {
            let entries = std::mem::take(
                &mut *self
                    .inner
                    .watch
                    .lock()
                    .expect("scheduler watch lock poisoned"),
            );
            let mut kept = Vec::new();
            for entry in entries {
                match entry {
                    WatchEntry::Conditional(mut conditional) => {
                        if !self.fire_if_due(&mut conditional) {
                            kept.push(WatchEntry::Conditional(conditional));
                        }
                    }
                    WatchEntry::Finalize(job) => {
                        if job.is_completed() {
                            continue;
                        }
                        if job.completion_due() {
                            job.finalize();
                            self.unregister_job(job.id());
                        } else {
                            kept.push(WatchEntry::Finalize(job));
                        }
                    }
                }
            }
            if !kept.is_empty() {
                self.inner
                    .watch
                    .lock()
                    .expect("scheduler watch lock poisoned")
                    .extend(kept);
            }
            std::thread::sleep(self.inner.config.watcher_interval);
        }
        tracing::trace!("[SCHED] watcher exiting");
    }
}

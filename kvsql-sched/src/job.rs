//! Jobs: the scheduler's unit of accounting and completion.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Unique job identifier; the primary correlation id in external logging.
pub type JobId = u64;

pub type CompletionCallback = Box<dyn FnOnce() + Send>;
pub type ReadinessPredicate = Box<dyn Fn() -> bool + Send + Sync>;

struct JobInner {
    id: JobId,
    /// Tasks submitted but not yet finished.
    pending_tasks: AtomicUsize,
    /// Set once the job's logical last task has run; completion cannot
    /// happen before arming.
    armed: AtomicBool,
    /// Guards against double finalization.
    finalized: AtomicBool,
    completed: Mutex<bool>,
    cond: Condvar,
    callback: Mutex<Option<CompletionCallback>>,
    readiness: Mutex<Option<ReadinessPredicate>>,
}

/// Handle to one job. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn new(id: JobId) -> Self {
        Self {
            inner: Arc::new(JobInner {
                id,
                pending_tasks: AtomicUsize::new(0),
                armed: AtomicBool::new(false),
                finalized: AtomicBool::new(false),
                completed: Mutex::new(false),
                cond: Condvar::new(),
                callback: Mutex::new(None),
                readiness: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Install the completion callback. Replaces any previous one.
    pub fn set_completion_callback(&self, callback: CompletionCallback) {
        *self
            .inner
            .callback
            .lock()
            .expect("job callback lock poisoned") = Some(callback);
    }

    /// Install the completion-readiness predicate. The job will not finalize
    /// while the predicate returns false, but no worker is burned waiting:
    /// the scheduler's watcher polls it.
    pub fn set_completion_readiness(&self, predicate: ReadinessPredicate) {
        *self
            .inner
            .readiness
            .lock()
            .expect("job readiness lock poisoned") = Some(predicate);
    }

    /// Mark that the job's logical last task has been scheduled or run.
    pub fn arm_completion(&self) {
        self.inner.armed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn begin_task(&self) {
        self.inner.pending_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true when this was the last in-flight task.
    pub(crate) fn end_task(&self) -> bool {
        self.inner.pending_tasks.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Whether the job may finalize right now (armed, drained, ready).
    pub(crate) fn completion_due(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
            && self.inner.pending_tasks.load(Ordering::SeqCst) == 0
            && self.readiness_satisfied()
    }

    pub(crate) fn readiness_satisfied(&self) -> bool {
        self.inner
            .readiness
            .lock()
            .expect("job readiness lock poisoned")
            .as_ref()
            .map(|p| p())
            .unwrap_or(true)
    }

    /// Run the completion callback and wake waiters. Idempotent.
    pub(crate) fn finalize(&self) {
        if self.inner.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self
            .inner
            .callback
            .lock()
            .expect("job callback lock poisoned")
            .take();
        if let Some(callback) = callback {
            callback();
        }
        let mut completed = self
            .inner
            .completed
            .lock()
            .expect("job completed lock poisoned");
        *completed = true;
        self.inner.cond.notify_all();
        tracing::trace!("[JOB] job {} completed", self.inner.id);
    }

    pub fn is_completed(&self) -> bool {
        *self
            .inner
            .completed
            .lock()
            .expect("job completed lock poisoned")
    }

    /// Block until the job completes.
    pub fn wait(&self) {
        let mut completed = self
            .inner
            .completed
            .lock()
            .expect("job completed lock poisoned");
        while !*completed {
            completed = self
                .inner
                .cond
                .wait(completed)
                .expect("job completed lock poisoned");
        }
    }

    /// Block until the job completes or the timeout expires; returns whether
    /// it completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut completed = self
            .inner
            .completed
            .lock()
            .expect("job completed lock poisoned");
        while !*completed {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(completed, deadline - now)
                .expect("job completed lock poisoned");
            completed = guard;
        }
        true
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field(
                "pending_tasks",
                &self.inner.pending_tasks.load(Ordering::SeqCst),
            )
            .field("armed", &self.inner.armed.load(Ordering::SeqCst))
            .finish()
    }
}

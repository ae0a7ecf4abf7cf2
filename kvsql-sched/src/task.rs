//! Tasks: closures plus scheduling tags.

use crate::job::Job;

pub type TaskBody = Box<dyn FnOnce() + Send>;
/// Predicate polled by the watcher for conditional tasks.
pub type ConditionPredicate = Box<dyn Fn() -> bool + Send>;
/// Optional cancellation probe; checked before the predicate.
pub type CancelProbe = Box<dyn Fn() -> bool + Send>;
/// Continuation of a conditional task; the argument is true when the wait
/// ended because the cancellation probe fired.
pub type ConditionalContinuation = Box<dyn FnOnce(bool) + Send>;

pub(crate) enum TaskKind {
    Run(TaskBody),
    Conditional {
        predicate: ConditionPredicate,
        cancel: Option<CancelProbe>,
        continuation: ConditionalContinuation,
    },
}

/// A unit of work submitted to the scheduler.
pub struct Task {
    pub(crate) job: Job,
    pub(crate) kind: TaskKind,
    pub(crate) sticky: bool,
    pub(crate) in_transaction: bool,
    pub(crate) lightweight: bool,
}

impl Task {
    /// A plain task.
    pub fn run(job: Job, body: impl FnOnce() + Send + 'static) -> Self {
        Self {
            job,
            kind: TaskKind::Run(Box::new(body)),
            sticky: false,
            in_transaction: false,
            lightweight: false,
        }
    }

    /// A conditional task: the continuation runs once the predicate fires or
    /// the cancellation probe (if any) trips.
    pub fn conditional(
        job: Job,
        predicate: impl Fn() -> bool + Send + 'static,
        cancel: Option<CancelProbe>,
        continuation: impl FnOnce(bool) + Send + 'static,
    ) -> Self {
        Self {
            job,
            kind: TaskKind::Conditional {
                predicate: Box::new(predicate),
                cancel,
                continuation: Box::new(continuation),
            },
            sticky: false,
            in_transaction: false,
            lightweight: false,
        }
    }

    /// Sticky tasks are never stolen from their submission queue.
    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    /// Tag as running inside a transaction. The core wraps such bodies with
    /// the transaction's task-use accounting.
    pub fn in_transaction(mut self) -> Self {
        self.in_transaction = true;
        self
    }

    /// Tag as lightweight; the hybrid scheduler runs these inline.
    pub fn lightweight(mut self, lightweight: bool) -> Self {
        self.lightweight = lightweight;
        self
    }
}

//! Scheduler interface and the explicit current-task context

use crate::scheduler::TaskId;
use std::fmt;
use std::time::Duration;

/// Outcome of a suspension
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Wakeup {
    /// Another task called [`Scheduler::wake`] for the suspended task
    Woken,
    /// The timeout passed to [`Scheduler::suspend_current`] elapsed first
    TimedOut,
    /// The scheduler cannot park this task (it does not manage it, or is
    /// shutting down)
    Unavailable,
}

/// Suspend/resume capability consumed by the task-aware synchronization
/// primitives.
///
/// Implementations must tolerate a `wake` arriving before the matching
/// `suspend_current`: the next suspension of that task then returns
/// [`Wakeup::Woken`] without parking. Callers treat every `Woken` as a hint
/// and re-check their own state, so an occasional stale wakeup is harmless.
pub trait Scheduler: Send + Sync {
    /// Park `current` until it is woken or `timeout` elapses.
    ///
    /// `None` means wait without a bound. A zero timeout may return
    /// [`Wakeup::TimedOut`] immediately.
    fn suspend_current(&self, current: TaskId, timeout: Option<Duration>) -> Wakeup;

    /// Make `task` runnable again.
    ///
    /// Must be callable from any thread, including from inside a spin-locked
    /// critical section.
    fn wake(&self, task: TaskId);
}

/// Context of the currently running task
///
/// Every blocking operation takes the caller's `Cx` explicitly instead of
/// looking up an ambient "current task".
#[derive(Clone, Copy)]
pub struct Cx<'a> {
    task: TaskId,
    scheduler: &'a dyn Scheduler,
}

impl<'a> Cx<'a> {
    /// Create a context for `task` running under `scheduler`
    pub fn new(task: TaskId, scheduler: &'a dyn Scheduler) -> Self {
        Self { task, scheduler }
    }

    /// Get the current task's ID
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Get the scheduler this task runs under
    pub fn scheduler(&self) -> &'a dyn Scheduler {
        self.scheduler
    }

    /// Suspend the current task
    pub fn suspend(&self, timeout: Option<Duration>) -> Wakeup {
        self.scheduler.suspend_current(self.task, timeout)
    }

    /// Wake another task through the same scheduler
    pub fn wake(&self, task: TaskId) {
        self.scheduler.wake(task)
    }
}

impl fmt::Debug for Cx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx").field("task", &self.task).finish_non_exhaustive()
    }
}

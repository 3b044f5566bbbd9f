//! Thread-backed scheduler adapter
//!
//! Every task runs on its own OS thread and parks on a per-task parker.
//! Suspending a task therefore blocks only the thread that hosts it, which
//! gives the mutex a real scheduler to run against outside a coroutine
//! runtime.

use crate::scheduler::{Cx, Scheduler, TaskId, Wakeup};
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Errors reported by [`ThreadScheduler`]
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The OS refused to create a thread for the task
    #[error("failed to spawn task thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The task panicked before producing a result
    #[error("{0} panicked")]
    Panicked(TaskId),
}

/// Configuration for [`ThreadScheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Prefix for task thread names (`<name>-<task id>`)
    pub name: String,

    /// Stack size per task thread in bytes (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            name: "strand".to_string(),
            stack_size: None,
        }
    }
}

/// One-permit parker
///
/// A wake stores the permit; the next park consumes it and returns without
/// blocking.
struct Parker {
    notified: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn park(&self, timeout: Option<Duration>) -> Wakeup {
        // An unrepresentable deadline waits without a bound.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let mut notified = self.notified.lock();
        while !*notified {
            match deadline {
                Some(deadline) => {
                    if self.cvar.wait_until(&mut notified, deadline).timed_out() && !*notified {
                        return Wakeup::TimedOut;
                    }
                }
                None => self.cvar.wait(&mut notified),
            }
        }
        *notified = false;
        Wakeup::Woken
    }

    fn unpark(&self) {
        *self.notified.lock() = true;
        self.cvar.notify_one();
    }
}

/// State shared between the scheduler handle and its task threads
struct Shared {
    options: SchedulerOptions,
    parkers: RwLock<FxHashMap<TaskId, Arc<Parker>>>,
}

impl Shared {
    fn register(&self) -> TaskId {
        let task = TaskId::new();
        self.parkers.write().insert(task, Arc::new(Parker::new()));
        tracing::trace!(%task, "task registered");
        task
    }

    fn deregister(&self, task: TaskId) {
        self.parkers.write().remove(&task);
        tracing::trace!(%task, "task deregistered");
    }

    fn parker(&self, task: TaskId) -> Option<Arc<Parker>> {
        self.parkers.read().get(&task).cloned()
    }
}

impl Scheduler for Shared {
    fn suspend_current(&self, current: TaskId, timeout: Option<Duration>) -> Wakeup {
        let Some(parker) = self.parker(current) else {
            tracing::debug!(task = %current, "suspend requested by unregistered task");
            return Wakeup::Unavailable;
        };

        tracing::trace!(task = %current, ?timeout, "parking task");
        let wakeup = parker.park(timeout);
        tracing::trace!(task = %current, ?wakeup, "task resumed");
        wakeup
    }

    fn wake(&self, task: TaskId) {
        match self.parker(task) {
            Some(parker) => parker.unpark(),
            None => tracing::debug!(%task, "wake for unregistered task ignored"),
        }
    }
}

/// Deregisters a task when its body returns or unwinds
struct Registration<'a> {
    shared: &'a Shared,
    task: TaskId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.shared.deregister(self.task);
    }
}

/// Scheduler that hosts every task on a dedicated OS thread
#[derive(Clone)]
pub struct ThreadScheduler {
    shared: Arc<Shared>,
}

impl ThreadScheduler {
    /// Create a scheduler with default options
    pub fn new() -> Self {
        Self::with_options(SchedulerOptions::default())
    }

    /// Create a scheduler with custom options
    pub fn with_options(options: SchedulerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                parkers: RwLock::new(FxHashMap::default()),
            }),
        }
    }

    /// Get the scheduler options
    pub fn options(&self) -> &SchedulerOptions {
        &self.shared.options
    }

    /// Number of tasks currently registered
    pub fn task_count(&self) -> usize {
        self.shared.parkers.read().len()
    }

    /// Run `f` on the calling thread as a registered task
    pub fn run<T>(&self, f: impl FnOnce(Cx<'_>) -> T) -> T {
        let task = self.shared.register();
        let _registration = Registration {
            shared: &self.shared,
            task,
        };
        f(Cx::new(task, &*self.shared))
    }

    /// Spawn `f` as a new task on its own thread
    ///
    /// The task is registered before the thread starts, so wakes addressed
    /// to it are never lost.
    pub fn spawn<F, T>(&self, f: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        F: FnOnce(Cx<'_>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = self.shared.register();

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.shared.options.name, task.as_u64()));
        if let Some(stack_size) = self.shared.options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let shared = Arc::clone(&self.shared);
        let spawned = builder.spawn(move || {
            let _registration = Registration {
                shared: &shared,
                task,
            };
            tracing::debug!(%task, "task started");
            f(Cx::new(task, &*shared))
        });

        match spawned {
            Ok(thread) => Ok(TaskHandle { task, thread }),
            Err(e) => {
                self.shared.deregister(task);
                Err(SchedulerError::Spawn(e))
            }
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn suspend_current(&self, current: TaskId, timeout: Option<Duration>) -> Wakeup {
        self.shared.suspend_current(current, timeout)
    }

    fn wake(&self, task: TaskId) {
        self.shared.wake(task)
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("options", &self.shared.options)
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// Handle to a task spawned by [`ThreadScheduler::spawn`]
#[derive(Debug)]
pub struct TaskHandle<T> {
    task: TaskId,
    thread: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Get the spawned task's ID
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Check whether the task has finished running
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the task to finish and return its result
    pub fn join(self) -> Result<T, SchedulerError> {
        self.thread.join().map_err(|_| SchedulerError::Panicked(self.task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_registers_task_for_its_duration() {
        let sched = ThreadScheduler::new();
        let inside = sched.run(|_cx| sched.task_count());
        assert_eq!(inside, 1);
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn test_wake_before_suspend_is_not_lost() {
        let sched = ThreadScheduler::new();
        sched.run(|cx| {
            cx.wake(cx.task_id());
            assert_eq!(cx.suspend(None), Wakeup::Woken);
        });
    }

    #[test]
    fn test_suspend_times_out() {
        let sched = ThreadScheduler::new();
        let start = Instant::now();
        let wakeup = sched.run(|cx| cx.suspend(Some(Duration::from_millis(5))));
        assert_eq!(wakeup, Wakeup::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_zero_timeout_returns_immediately() {
        let sched = ThreadScheduler::new();
        let wakeup = sched.run(|cx| cx.suspend(Some(Duration::ZERO)));
        assert_eq!(wakeup, Wakeup::TimedOut);
    }

    #[test]
    fn test_unregistered_task_is_unavailable() {
        let sched = ThreadScheduler::new();
        let stranger = TaskId::new();
        assert_eq!(sched.suspend_current(stranger, None), Wakeup::Unavailable);
        // Ignored rather than stored.
        sched.wake(stranger);
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn test_spawned_task_is_woken_from_another_task() {
        let sched = ThreadScheduler::new();
        let handle = sched.spawn(|cx| cx.suspend(None)).unwrap();
        sched.run(|cx| cx.wake(handle.task_id()));
        assert_eq!(handle.join().unwrap(), Wakeup::Woken);
        assert_eq!(sched.task_count(), 0);
    }

    #[test]
    fn test_spawn_uses_configured_thread_name() {
        let sched = ThreadScheduler::with_options(SchedulerOptions {
            name: "worker".to_string(),
            stack_size: Some(256 * 1024),
        });
        let handle = sched
            .spawn(|_cx| thread::current().name().map(str::to_string))
            .unwrap();
        let expected = format!("worker-{}", handle.task_id().as_u64());
        assert_eq!(handle.join().unwrap(), Some(expected));
    }

    #[test]
    fn test_panicking_task_reports_error() {
        let sched = ThreadScheduler::new();
        let handle = sched
            .spawn(|_cx| {
                panic!("boom");
            })
            .unwrap();
        let task = handle.task_id();
        match handle.join() {
            Err(SchedulerError::Panicked(id)) => assert_eq!(id, task),
            other => panic!("unexpected join result: {other:?}"),
        }
        assert_eq!(sched.task_count(), 0);
    }
}

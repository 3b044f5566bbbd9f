//! Task-aware Mutex implementation

use crate::scheduler::{Cx, TaskId, Wakeup};
use crate::sync::spinlock::SpinLock;
use crate::sync::wait_queue::{WaitItem, WaitQueue};
use std::fmt;
use std::pin::{pin, Pin};
use std::time::{Duration, Instant};

/// Errors returned by the bounded lock operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The deadline passed before the mutex was handed over
    #[error("timed out waiting for mutex")]
    TimedOut,

    /// The caller already owns the mutex (locks are not reentrant)
    #[error("mutex already locked by {0}")]
    Reentrant(TaskId),

    /// The scheduler refused to suspend the caller
    #[error("scheduler cannot suspend {0}")]
    Unavailable(TaskId),
}

impl LockError {
    /// Check whether this is the timeout outcome rather than an invalid call
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::TimedOut)
    }
}

/// Bookkeeping guarded by the spin lock
struct State {
    /// Current owner Task (None if unlocked)
    owner: Option<TaskId>,

    /// FIFO wait queue of blocked Tasks
    waiters: WaitQueue,
}

/// Task-aware Mutex with FIFO hand-off
///
/// A contended lock suspends the calling task through its scheduler instead
/// of blocking the worker thread. Unlocking hands ownership straight to the
/// longest waiting task, so the mutex never passes through a free state
/// while anyone is queued.
///
/// Every operation takes the caller's [`Cx`]. All tasks that share a mutex
/// must run under the same scheduler, since `unlock` wakes the next owner
/// through the unlocking task's scheduler.
///
/// Dropping a mutex that is still locked, or that still has waiters, is a
/// bug and panics.
pub struct Mutex {
    state: SpinLock<State>,
}

impl Mutex {
    /// Create a new unlocked mutex
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(State {
                owner: None,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Attempt to lock the mutex without suspending.
    ///
    /// Returns `false` if any task, including the caller, holds it.
    pub fn try_lock(&self, cx: &Cx<'_>) -> bool {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            return false;
        }
        state.owner = Some(cx.task_id());
        true
    }

    /// Lock the mutex, suspending the current task until it is handed over.
    ///
    /// # Panics
    ///
    /// Panics if the caller already owns the mutex, or if the scheduler
    /// cannot suspend the caller.
    pub fn lock(&self, cx: &Cx<'_>) {
        if let Err(e) = self.acquire(cx, None) {
            panic!("Mutex::lock failed for {}: {}", cx.task_id(), e);
        }
    }

    /// Lock the mutex, waiting at most `timeout`.
    ///
    /// A zero timeout still attempts one acquisition, so it behaves like a
    /// poll. On [`LockError::TimedOut`] the caller has left the wait queue
    /// and the mutex state is unchanged by this call.
    pub fn lock_timeout(&self, cx: &Cx<'_>, timeout: Duration) -> Result<(), LockError> {
        // A timeout too large to represent waits without a bound.
        self.acquire(cx, Instant::now().checked_add(timeout))
    }

    /// Lock the mutex, waiting until `deadline` at the latest.
    ///
    /// See [`Mutex::lock_timeout`].
    pub fn lock_deadline(&self, cx: &Cx<'_>, deadline: Instant) -> Result<(), LockError> {
        self.acquire(cx, Some(deadline))
    }

    /// Unlock the mutex, handing it to the longest waiting task if any.
    ///
    /// # Panics
    ///
    /// Panics if the caller does not own the mutex.
    pub fn unlock(&self, cx: &Cx<'_>) {
        let task = cx.task_id();
        let next = {
            let mut state = self.state.lock();
            assert_eq!(
                state.owner,
                Some(task),
                "{} unlocked a mutex it does not own",
                task
            );
            let next = state.waiters.pop_front();
            state.owner = next;
            next
        };

        // The waiter decides it owns the mutex from its item having been
        // popped, so the wake can happen outside the critical section.
        if let Some(next) = next {
            tracing::trace!(from = %task, to = %next, "mutex handed off");
            cx.wake(next);
        }
    }

    /// Check current owner
    pub fn owner(&self) -> Option<TaskId> {
        self.state.lock().owner
    }

    /// Check if the mutex is locked
    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    /// Check if locked by a specific task
    pub fn is_locked_by(&self, task_id: TaskId) -> bool {
        self.state.lock().owner == Some(task_id)
    }

    /// Get number of waiting Tasks
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Get the waiting Tasks in hand-off order
    pub fn waiting_tasks(&self) -> Vec<TaskId> {
        self.state.lock().waiters.iter().collect()
    }

    fn acquire(&self, cx: &Cx<'_>, deadline: Option<Instant>) -> Result<(), LockError> {
        let task = cx.task_id();
        let item = pin!(WaitItem::new(task));
        let item = item.as_ref();

        let waiters = {
            let mut state = self.state.lock();
            match state.owner {
                None => {
                    state.owner = Some(task);
                    return Ok(());
                }
                Some(owner) if owner == task => return Err(LockError::Reentrant(task)),
                Some(_) => {}
            }

            if let Some(deadline) = deadline {
                if deadline <= Instant::now() {
                    return Err(LockError::TimedOut);
                }
            }

            // SAFETY: the item is fresh, pinned in this frame, and `Enqueued`
            // below unlinks it before the frame is left.
            unsafe { state.waiters.push_back(item) };
            state.waiters.len()
        };

        let enqueued = Enqueued {
            mutex: self,
            item,
            cx,
        };
        tracing::trace!(%task, waiters, "waiting for mutex");

        loop {
            let timeout = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let wakeup = match timeout {
                Some(Duration::ZERO) => Wakeup::TimedOut,
                _ => cx.suspend(timeout),
            };

            let mut state = self.state.lock();

            // SAFETY: the item is only ever pushed into this mutex's queue.
            if !unsafe { state.waiters.contains(item) } {
                // Popped by `unlock`, which already made us the owner. This
                // wins over a timeout reported for the same suspension.
                debug_assert_eq!(state.owner, Some(task));
                enqueued.disarm();
                return Ok(());
            }

            let error = match wakeup {
                Wakeup::TimedOut if deadline.is_some() => LockError::TimedOut,
                Wakeup::Unavailable => LockError::Unavailable(task),
                Wakeup::Woken | Wakeup::TimedOut => {
                    drop(state);
                    tracing::trace!(%task, ?wakeup, "spurious wakeup while waiting for mutex");
                    continue;
                }
            };

            // SAFETY: see `contains` above.
            unsafe { state.waiters.remove(item) };
            drop(state);
            enqueued.disarm();
            tracing::debug!(%task, %error, "gave up waiting for mutex");
            return Err(error);
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        // Already unwinding; a second panic would abort before the first
        // one is reported.
        if std::thread::panicking() {
            return;
        }

        let state = self.state.get_mut();
        assert!(
            state.owner.is_none(),
            "mutex dropped while locked by {:?}",
            state.owner
        );
        assert!(
            state.waiters.is_empty(),
            "mutex dropped with {} waiting tasks",
            state.waiters.len()
        );
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("owner", &state.owner)
            .field("waiters", &state.waiters)
            .finish()
    }
}

/// Unlinks a queued [`WaitItem`] if the waiting frame unwinds
///
/// The normal exits decide hand-off versus timeout under the spin lock and
/// disarm the guard themselves.
struct Enqueued<'a, 'cx> {
    mutex: &'a Mutex,
    item: Pin<&'a WaitItem>,
    cx: &'a Cx<'cx>,
}

impl Enqueued<'_, '_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for Enqueued<'_, '_> {
    fn drop(&mut self) {
        let task = self.item.task_id();
        let next = {
            let mut state = self.mutex.state.lock();
            // SAFETY: the item is only ever pushed into this mutex's queue.
            if unsafe { state.waiters.remove(self.item) } || state.owner != Some(task) {
                return;
            }
            // Handed off while unwinding: pass ownership on instead of
            // leaking it.
            let next = state.waiters.pop_front();
            state.owner = next;
            next
        };

        tracing::debug!(%task, ?next, "waiter unwound after hand-off");
        if let Some(next) = next {
            self.cx.wake(next);
        }
    }
}

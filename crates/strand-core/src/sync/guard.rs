//! RAII guard for automatic mutex unlock

use crate::scheduler::Cx;
use crate::sync::{LockError, Mutex};
use std::fmt;
use std::time::Duration;

/// RAII guard for Mutex (auto-unlocks on drop)
///
/// The guard carries the owning task's context, so dropping it hands the
/// mutex to the next waiter through the right scheduler, including when the
/// owning task unwinds.
pub struct MutexGuard<'a> {
    /// Reference to the mutex
    mutex: &'a Mutex,
    /// Context of the owning task
    cx: Cx<'a>,
    /// Whether the guard has been manually unlocked
    unlocked: bool,
}

impl<'a> MutexGuard<'a> {
    /// Wrap a mutex the task in `cx` already owns
    fn new(mutex: &'a Mutex, cx: Cx<'a>) -> Self {
        Self {
            mutex,
            cx,
            unlocked: false,
        }
    }

    /// Get the locked mutex
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }

    /// Manually unlock the mutex early (before drop)
    pub fn unlock(mut self) {
        self.unlocked = true;
        self.mutex.unlock(&self.cx);
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if !self.unlocked {
            self.mutex.unlock(&self.cx);
        }
    }
}

impl fmt::Debug for MutexGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexGuard")
            .field("owner", &self.cx.task_id())
            .finish_non_exhaustive()
    }
}

impl Mutex {
    /// Lock with RAII guard, suspending until the mutex is handed over
    ///
    /// # Panics
    ///
    /// Panics under the same conditions as [`Mutex::lock`].
    pub fn lock_guard<'a>(&'a self, cx: &Cx<'a>) -> MutexGuard<'a> {
        self.lock(cx);
        MutexGuard::new(self, *cx)
    }

    /// Lock with RAII guard, waiting at most `timeout`
    pub fn lock_guard_timeout<'a>(
        &'a self,
        cx: &Cx<'a>,
        timeout: Duration,
    ) -> Result<MutexGuard<'a>, LockError> {
        self.lock_timeout(cx, timeout)?;
        Ok(MutexGuard::new(self, *cx))
    }

    /// Lock with RAII guard if the mutex is free
    pub fn try_lock_guard<'a>(&'a self, cx: &Cx<'a>) -> Option<MutexGuard<'a>> {
        self.try_lock(cx).then(|| MutexGuard::new(self, *cx))
    }
}

//! Spin lock for short bookkeeping critical sections
//!
//! Acquiring never suspends the task and never calls into a scheduler. It is
//! only meant to guard a handful of pointer and flag updates, and must not be
//! held across anything that can park the current task.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};

/// A [`lock_api`] spin lock guarding a value of type `T`
pub type SpinLock<T> = lock_api::Mutex<RawSpinLock, T>;

/// Raw test-and-test-and-set spin lock
pub struct RawSpinLock {
    locked: AtomicBool,
}

// SAFETY: `lock` only returns after winning the false -> true exchange with
// Acquire ordering, and `unlock` publishes with Release, so at most one owner
// exists and its writes are visible to the next one.
unsafe impl lock_api::RawMutex for RawSpinLock {
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked: AtomicBool::new(false),
    };

    fn lock(&self) {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.is_locked() {
                backoff.spin();
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

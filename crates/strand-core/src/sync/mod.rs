//! Synchronization primitives for Task coordination
//!
//! This module provides a mutex that blocks at the Task level instead of the
//! OS thread level. Contended tasks are suspended through the
//! [`Scheduler`](crate::scheduler::Scheduler) and resumed in FIFO order.

mod guard;
mod mutex;
mod spinlock;
mod wait_queue;

pub use guard::MutexGuard;
pub use mutex::{LockError, Mutex};

//! Strand Core
//!
//! This crate provides synchronization for cooperatively scheduled tasks:
//! - A task-aware Mutex that suspends contending tasks instead of threads
//! - FIFO hand-off between waiters with bounded (timeout) waiting
//! - The scheduler boundary the mutex parks and wakes tasks through
//! - A thread-backed scheduler adapter for running tasks on OS threads

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod scheduler;
pub mod sync;

pub use scheduler::{
    Cx, Scheduler, SchedulerError, SchedulerOptions, TaskHandle, TaskId, ThreadScheduler, Wakeup,
};
pub use sync::{LockError, Mutex, MutexGuard};

//! Task Scheduler boundary
//!
//! The mutex in [`crate::sync`] never schedules anything itself. It consumes
//! the [`Scheduler`] trait to park the current task and to make a parked task
//! runnable again. [`ThreadScheduler`] is an adapter that backs every task
//! with an OS thread.

mod context;
#[cfg(test)]
mod scripted;
mod task;
mod thread;

pub use context::{Cx, Scheduler, Wakeup};
#[cfg(test)]
pub(crate) use scripted::ScriptedScheduler;
pub use task::TaskId;
pub use thread::{SchedulerError, SchedulerOptions, TaskHandle, ThreadScheduler};

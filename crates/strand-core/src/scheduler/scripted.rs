//! Deterministic scheduler for unit tests
//!
//! Nothing actually parks. Each suspension runs the next queued step, which
//! stands in for "other tasks ran meanwhile", and then reports `Woken` if the
//! task was woken, `TimedOut` if it had a timeout, or whatever outcome was
//! forced with [`ScriptedScheduler::report`].

use crate::scheduler::{Cx, Scheduler, TaskId, Wakeup};
use parking_lot::Mutex as ParkingLotMutex;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::time::Duration;

type Step = Box<dyn FnOnce(&ScriptedScheduler) + Send>;

#[derive(Default)]
pub(crate) struct ScriptedScheduler {
    steps: ParkingLotMutex<VecDeque<Step>>,
    forced: ParkingLotMutex<VecDeque<Wakeup>>,
    permits: ParkingLotMutex<FxHashSet<TaskId>>,
    suspensions: ParkingLotMutex<Vec<(TaskId, Option<Duration>)>>,
    wakes: ParkingLotMutex<Vec<TaskId>>,
}

impl ScriptedScheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cx(&self, task: TaskId) -> Cx<'_> {
        Cx::new(task, self)
    }

    /// Queue a step to run during the next suspension
    pub(crate) fn then(&self, step: impl FnOnce(&ScriptedScheduler) + Send + 'static) {
        self.steps.lock().push_back(Box::new(step));
    }

    /// Force the outcome of the next suspension
    pub(crate) fn report(&self, wakeup: Wakeup) {
        self.forced.lock().push_back(wakeup);
    }

    pub(crate) fn suspensions(&self) -> Vec<(TaskId, Option<Duration>)> {
        self.suspensions.lock().clone()
    }

    pub(crate) fn suspensions_of(&self, task: TaskId) -> usize {
        self.suspensions.lock().iter().filter(|(t, _)| *t == task).count()
    }

    pub(crate) fn wakes(&self) -> Vec<TaskId> {
        self.wakes.lock().clone()
    }
}

impl Scheduler for ScriptedScheduler {
    fn suspend_current(&self, current: TaskId, timeout: Option<Duration>) -> Wakeup {
        self.suspensions.lock().push((current, timeout));

        let step = self.steps.lock().pop_front();
        if let Some(step) = step {
            step(self);
        }

        let forced = self.forced.lock().pop_front();
        let woken = self.permits.lock().remove(&current);
        match forced {
            Some(wakeup) => wakeup,
            None if woken => Wakeup::Woken,
            None if timeout.is_some() => Wakeup::TimedOut,
            None => panic!("{current} would stay parked forever"),
        }
    }

    fn wake(&self, task: TaskId) {
        self.wakes.lock().push(task);
        self.permits.lock().insert(task);
    }
}

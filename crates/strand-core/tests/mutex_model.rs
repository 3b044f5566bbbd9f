//! Property tests of the non-blocking Mutex paths against a simple model

use proptest::prelude::*;
use std::time::Duration;
use strand_core::{Cx, LockError, Mutex, Scheduler, TaskId, Wakeup};

/// Scheduler for sequences that must never suspend
struct NoSuspend;

impl Scheduler for NoSuspend {
    fn suspend_current(&self, current: TaskId, _timeout: Option<Duration>) -> Wakeup {
        panic!("{current} suspended on a non-blocking path");
    }

    fn wake(&self, task: TaskId) {
        panic!("{task} woken without any waiter");
    }
}

const TASKS: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    /// `try_lock` by task i
    TryLock(usize),
    /// `lock_timeout(0)` by task i
    Poll(usize),
    /// `lock` by task i, only issued when the model says the mutex is free
    Lock(usize),
    /// `unlock` by the current owner
    Unlock,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..TASKS).prop_map(Op::TryLock),
        (0..TASKS).prop_map(Op::Poll),
        (0..TASKS).prop_map(Op::Lock),
        Just(Op::Unlock),
    ]
}

proptest! {
    #[test]
    fn test_mutex_matches_owner_model(ops in proptest::collection::vec(op(), 0..100)) {
        let sched = NoSuspend;
        let tasks: Vec<TaskId> = (0..TASKS).map(|_| TaskId::new()).collect();
        let cxs: Vec<Cx<'_>> = tasks.iter().map(|&t| Cx::new(t, &sched)).collect();
        let mutex = Mutex::new();
        let mut owner: Option<usize> = None;

        for op in ops {
            match op {
                Op::TryLock(i) => {
                    let acquired = mutex.try_lock(&cxs[i]);
                    prop_assert_eq!(acquired, owner.is_none());
                    if acquired {
                        owner = Some(i);
                    }
                }
                Op::Poll(i) => {
                    let result = mutex.lock_timeout(&cxs[i], Duration::ZERO);
                    match owner {
                        None => {
                            prop_assert_eq!(result, Ok(()));
                            owner = Some(i);
                        }
                        Some(o) if o == i => {
                            prop_assert_eq!(result, Err(LockError::Reentrant(tasks[i])));
                        }
                        Some(_) => prop_assert_eq!(result, Err(LockError::TimedOut)),
                    }
                }
                Op::Lock(i) => {
                    if owner.is_none() {
                        mutex.lock(&cxs[i]);
                        owner = Some(i);
                    }
                }
                Op::Unlock => {
                    if let Some(o) = owner.take() {
                        mutex.unlock(&cxs[o]);
                    }
                }
            }

            prop_assert_eq!(mutex.owner(), owner.map(|i| tasks[i]));
            prop_assert_eq!(mutex.waiting_count(), 0);
        }

        if let Some(o) = owner {
            mutex.unlock(&cxs[o]);
        }
    }
}

//! Intrusive FIFO queue of blocked tasks
//!
//! Each [`WaitItem`] lives in the stack frame of the blocked call that
//! created it. The queue only stores non-owning pointers to those frames, so
//! parking a task allocates nothing. The frame is responsible for making sure
//! its item has left the queue before it returns.

use crate::scheduler::TaskId;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomPinned;
use std::pin::Pin;
use std::ptr::NonNull;

/// Wait record for one blocked caller
pub struct WaitItem {
    task: TaskId,
    links: UnsafeCell<Links>,
    _pin: PhantomPinned,
}

struct Links {
    next: Option<NonNull<WaitItem>>,
    linked: bool,
}

// SAFETY: `links` is only read or written through a `WaitQueue` that the
// item is (or was) pushed into, and that queue is always reached through a
// lock. `task` is immutable.
unsafe impl Send for WaitItem {}
unsafe impl Sync for WaitItem {}

impl WaitItem {
    /// Create an unlinked wait record for `task`
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            links: UnsafeCell::new(Links {
                next: None,
                linked: false,
            }),
            _pin: PhantomPinned,
        }
    }

    /// The task this record belongs to
    pub fn task_id(&self) -> TaskId {
        self.task
    }
}

impl fmt::Debug for WaitItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitItem").field("task", &self.task).finish_non_exhaustive()
    }
}

/// Singly linked FIFO of [`WaitItem`]s with a tail pointer
pub struct WaitQueue {
    head: Option<NonNull<WaitItem>>,
    tail: Option<NonNull<WaitItem>>,
    len: usize,
}

// SAFETY: the queue only dereferences items that are pinned and linked, and
// those are `Sync`.
unsafe impl Send for WaitQueue {}

impl WaitQueue {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of linked items
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether no item is linked
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append `item` at the tail in O(1).
    ///
    /// # Safety
    ///
    /// `item` must not be linked into any queue. It must stay at its pinned
    /// address until it has been unlinked again by [`pop_front`] or
    /// [`remove`], and while linked it must only be accessed through this
    /// queue.
    ///
    /// [`pop_front`]: WaitQueue::pop_front
    /// [`remove`]: WaitQueue::remove
    pub unsafe fn push_back(&mut self, item: Pin<&WaitItem>) {
        let ptr = NonNull::from(item.get_ref());
        let links = &mut *item.links.get();
        debug_assert!(!links.linked, "{:?} pushed twice", item.task);
        links.next = None;
        links.linked = true;

        match self.tail {
            Some(tail) => (*tail.as_ref().links.get()).next = Some(ptr),
            None => self.head = Some(ptr),
        }
        self.tail = Some(ptr);
        self.len += 1;
    }

    /// Unlink the head item in O(1) and return its task.
    pub fn pop_front(&mut self) -> Option<TaskId> {
        let head = self.head?;

        // SAFETY: linked items are valid until they leave the queue, which
        // is what happens here.
        unsafe {
            let item = head.as_ref();
            let task = item.task;
            let links = &mut *item.links.get();

            self.head = links.next.take();
            if self.head.is_none() {
                self.tail = None;
            }
            links.linked = false;
            self.len -= 1;

            Some(task)
        }
    }

    /// Unlink `item` from any position in O(n).
    ///
    /// Returns `false` without touching the queue if the item is not linked,
    /// which makes repeated removal a no-op.
    ///
    /// # Safety
    ///
    /// `item` must either be unlinked or linked into this queue.
    pub unsafe fn remove(&mut self, item: Pin<&WaitItem>) -> bool {
        if !(*item.links.get()).linked {
            return false;
        }

        let target = NonNull::from(item.get_ref());
        let mut prev: Option<NonNull<WaitItem>> = None;
        let mut cursor = self.head;

        while let Some(current) = cursor {
            let next = (*current.as_ref().links.get()).next;
            if current == target {
                match prev {
                    Some(prev) => (*prev.as_ref().links.get()).next = next,
                    None => self.head = next,
                }
                if self.tail == Some(target) {
                    self.tail = prev;
                }

                let links = &mut *item.links.get();
                links.next = None;
                links.linked = false;
                self.len -= 1;
                return true;
            }
            prev = cursor;
            cursor = next;
        }

        false
    }

    /// Check whether `item` is currently linked.
    ///
    /// # Safety
    ///
    /// `item` must either be unlinked or linked into this queue.
    pub unsafe fn contains(&self, item: Pin<&WaitItem>) -> bool {
        (*item.links.get()).linked
    }

    /// Iterate over the waiting tasks, head first
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let current = cursor?;
            // SAFETY: linked items are valid while the queue is borrowed.
            unsafe {
                let item = current.as_ref();
                cursor = (*item.links.get()).next;
                Some(item.task)
            }
        })
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

//! Intrusive singly-linked task queue.
//!
//! Tasks chain through their embedded `next` pointer, so the queue itself
//! is three words: head, tail, length. `push_back`, `append`, and
//! `pop_front` are O(1); `split_front(n)` walks `n` links and detaches them
//! as a new list, which is what donation uses to hand a batch of the oldest
//! tasks to an idle peer in one splice.
//!
//! # Invariants
//! - Every node reachable from `head` was produced by `Box::into_raw` and
//!   is owned exclusively by this list until popped or spliced out.
//! - `tail` points at the last node iff the list is non-empty, and the last
//!   node's `next` is null.
//! - `len` equals the number of linked nodes.

use std::mem;
use std::ptr;

use crate::task::Task;

pub(crate) struct TaskList {
    head: *mut Task,
    tail: *mut Task,
    len: usize,
}

// SAFETY: the list exclusively owns its nodes, and `Task` is Send.
unsafe impl Send for TaskList {}

impl TaskList {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends a single task at the back.
    pub(crate) fn push_back(&mut self, task: Box<Task>) {
        debug_assert!(task.next.is_null(), "task already linked into a queue");
        let node = Box::into_raw(task);
        if self.head.is_null() {
            self.head = node;
        } else {
            // SAFETY: non-empty list, `tail` points at the owned last node.
            unsafe { (*self.tail).next = node };
        }
        self.tail = node;
        self.len += 1;
    }

    /// Removes and returns the oldest task, clearing its link.
    pub(crate) fn pop_front(&mut self) -> Option<Box<Task>> {
        if self.head.is_null() {
            return None;
        }
        let node = self.head;
        // SAFETY: `node` is the owned head of this list.
        unsafe {
            self.head = (*node).next;
            (*node).next = ptr::null_mut();
        }
        if self.head.is_null() {
            self.tail = ptr::null_mut();
        }
        self.len -= 1;
        // SAFETY: `node` came from `Box::into_raw` and is now unlinked.
        Some(unsafe { Box::from_raw(node) })
    }

    /// Splices `other` onto the back in O(1).
    pub(crate) fn append(&mut self, mut other: TaskList) {
        if other.is_empty() {
            return;
        }
        if self.head.is_null() {
            self.head = other.head;
        } else {
            // SAFETY: non-empty list, `tail` points at the owned last node.
            unsafe { (*self.tail).next = other.head };
        }
        self.tail = other.tail;
        self.len += other.len;
        other.head = ptr::null_mut();
        other.tail = ptr::null_mut();
        other.len = 0;
    }

    /// Splices `other` onto the front.
    pub(crate) fn prepend(&mut self, other: TaskList) {
        if other.is_empty() {
            return;
        }
        let rest = mem::take(self);
        *self = other;
        self.append(rest);
    }

    /// Detaches the first `count` tasks as their own list.
    ///
    /// `count` must be between 1 and `len`.
    pub(crate) fn split_front(&mut self, count: usize) -> TaskList {
        debug_assert!(count >= 1 && count <= self.len, "split out of range");
        if count == self.len {
            return mem::take(self);
        }

        let head = self.head;
        let mut tail = head;
        // SAFETY: `count < len`, so every link followed here is non-null and
        // owned by this list.
        unsafe {
            for _ in 1..count {
                tail = (*tail).next;
            }
            self.head = (*tail).next;
            (*tail).next = ptr::null_mut();
        }
        self.len -= count;

        TaskList {
            head,
            tail,
            len: count,
        }
    }

    /// Moves the whole list out, leaving this one empty.
    pub(crate) fn take(&mut self) -> TaskList {
        mem::take(self)
    }
}

impl Default for TaskList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskList {
    fn drop(&mut self) {
        // Iterative teardown; a recursive node drop would overflow the
        // stack on long queues.
        while self.pop_front().is_some() {}
    }
}

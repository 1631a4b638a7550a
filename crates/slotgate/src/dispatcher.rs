//! Bounded FIFO dispatcher.
//!
//! Pure bookkeeping: the dispatcher never invokes a task. [`Dispatcher::submit`] and
//! [`Dispatcher::release`] hand back the task that just got a slot, and the owner starts it
//! after dropping whatever lock guards the dispatcher. A task may therefore call back into
//! its owner (e.g. complete itself) without deadlocking.
//!
//! Slot release is explicit and separate from the task body: a slot stays taken for the
//! whole asynchronous lifetime of the work, not just the dispatch call.

use std::collections::VecDeque;

/// Outcome of [`Dispatcher::submit`].
#[must_use = "a started task must be run by the caller"]
#[derive(Debug)]
pub(crate) enum Submitted<T> {
    /// A slot was free. The task is counted as running and must be started now.
    Started(T),
    /// Every slot is busy. The task was appended to the wait list.
    Queued,
}

#[derive(Debug)]
pub(crate) struct Dispatcher<T> {
    concurrency: usize,
    running: usize,
    waiting: VecDeque<T>,
}

impl<T> Dispatcher<T> {
    pub fn new(concurrency: usize) -> Self {
        debug_assert!(concurrency > 0, "dispatcher needs at least one slot");
        Self {
            concurrency,
            running: 0,
            waiting: VecDeque::new(),
        }
    }

    pub fn has_free_slot(&self) -> bool {
        self.running < self.concurrency
    }

    pub fn submit(&mut self, task: T) -> Submitted<T> {
        if self.has_free_slot() {
            self.running += 1;
            Submitted::Started(task)
        } else {
            self.waiting.push_back(task);
            Submitted::Queued
        }
    }

    /// Free one running slot. Returns the wait-list head, already counted as running.
    #[must_use = "a promoted task must be run by the caller"]
    pub fn release(&mut self) -> Option<T> {
        if self.running == 0 {
            debug_assert!(false, "release without a running task");
            tracing::error!("Bug: dispatcher release called with no running task");
            return None;
        }
        self.running -= 1;

        let next = self.waiting.pop_front()?;
        self.running += 1;
        Some(next)
    }

    /// Remove the first waiting task matching `predicate`. Running tasks are untouched.
    pub fn withdraw(&mut self, predicate: impl FnMut(&T) -> bool) -> Option<T> {
        let index = self.waiting.iter().position(predicate)?;
        self.waiting.remove(index)
    }

    /// Number of waiting tasks.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn running(&self) -> usize {
        self.running
    }
}

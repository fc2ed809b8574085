//! Unbounded FIFO with an explicit end-of-stream flag.
//!
//! Producers `put` items and call [`CompletionQueue::set_completed`] once when done. Consumers
//! poll with [`CompletionQueue::try_get`] and stop only when [`CompletionQueue::is_drained`]
//! (completed and empty, observed under one lock), so no item that arrives before completion
//! can be lost.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    completed: bool,
}

pub struct CompletionQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> Default for CompletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                completed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item. Never blocks. Putting after `set_completed` is a caller bug; the item is
    /// still delivered if a consumer has not yet observed the queue drained.
    pub fn put(&self, item: T) {
        self.state().items.push_back(item);
        self.ready.notify_one();
    }

    /// Pop the oldest item, waiting up to `timeout`. `None` when nothing arrived in time or the
    /// queue completed while empty.
    pub fn try_get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.completed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark end of stream. Idempotent; never reverts.
    pub fn set_completed(&self) {
        self.state().completed = true;
        self.ready.notify_all();
    }

    pub fn is_completed(&self) -> bool {
        self.state().completed
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Completed and empty, checked atomically.
    pub fn is_drained(&self) -> bool {
        let state = self.state();
        state.completed && state.items.is_empty()
    }

    /// Take everything currently queued without waiting.
    pub fn drain_now(&self) -> Vec<T> {
        self.state().items.drain(..).collect()
    }
}

//! Unbounded multi-producer/multi-consumer pipe
//!
//! Producers never block. Consumers block until an item arrives or the
//! intake is closed. Closing the intake is the only shutdown signal: once it
//! is closed, consumers drain what is left and then observe the
//! drained-and-closed sentinel.

use super::{PutError, QueueError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct PipeState<T> {
    items: VecDeque<T>,
    intake_open: bool,
}

pub struct Pipe<T> {
    state: Mutex<PipeState<T>>,
    available: Condvar,
}

impl<T> Default for Pipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pipe<T> {
    pub fn new() -> Self {
        Pipe {
            state: Mutex::new(PipeState {
                items: VecDeque::new(),
                intake_open: true,
            }),
            available: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        !self.state.lock().intake_open
    }

    /// Enqueue without blocking. Fails only after the intake is closed.
    pub fn push(&self, item: T) -> Result<(), PutError<T>> {
        let mut state = self.state.lock();
        if !state.intake_open {
            return Err(PutError {
                kind: QueueError::Closed,
                item,
            });
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Block until an item is available. `None` means drained and closed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if !state.intake_open {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Block until at least one item is available, then take up to `max`.
    /// An empty vector is the drained-and-closed sentinel.
    pub fn pop_batch(&self, max: usize) -> Vec<T> {
        let mut state = self.state.lock();
        loop {
            if !state.items.is_empty() {
                return take_batch(&mut state.items, max);
            }
            if !state.intake_open {
                return Vec::new();
            }
            self.available.wait(&mut state);
        }
    }

    /// Block until at least one item is available, then keep collecting for
    /// up to `linger` until `max` items are queued or the intake closes.
    /// An empty vector is the drained-and-closed sentinel.
    pub fn pop_batch_linger(&self, max: usize, linger: Duration) -> Vec<T> {
        let max = max.max(1);
        let mut state = self.state.lock();
        while state.items.is_empty() {
            if !state.intake_open {
                return Vec::new();
            }
            self.available.wait(&mut state);
        }

        let deadline = Instant::now() + linger;
        while state.items.len() < max && state.intake_open {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        take_batch(&mut state.items, max)
    }

    /// Take everything queued right now without waiting.
    pub fn drain_all(&self) -> Vec<T> {
        self.state.lock().items.drain(..).collect()
    }

    /// Stop accepting items and wake every waiting consumer.
    pub fn close_intake(&self) {
        self.state.lock().intake_open = false;
        self.available.notify_all();
    }
}

fn take_batch<T>(items: &mut VecDeque<T>, max: usize) -> Vec<T> {
    let n = items.len().min(max.max(1));
    items.drain(..n).collect()
}

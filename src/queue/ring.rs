//! Fixed-capacity ring buffer
//!
//! Circular array with separate read/write cursors and an element counter,
//! all behind one mutex. A full ring refuses new items rather than blocking
//! or growing.

use super::{PutError, QueueError};
use parking_lot::Mutex;

struct RingInner<T> {
    slots: Vec<Option<T>>,
    read: usize,
    write: usize,
    count: usize,
}

pub struct RingQueue<T> {
    inner: Mutex<RingInner<T>>,
    capacity: usize,
}

impl<T> RingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        RingQueue {
            inner: Mutex::new(RingInner {
                slots,
                read: 0,
                write: 0,
                count: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `item`, or hand it back with `RingFull`.
    pub fn put(&self, item: T) -> Result<(), PutError<T>> {
        let mut ring = self.inner.lock();
        if ring.count == self.capacity {
            return Err(PutError {
                kind: QueueError::RingFull,
                item,
            });
        }
        let at = ring.write;
        ring.slots[at] = Some(item);
        ring.write = (at + 1) % self.capacity;
        ring.count += 1;
        Ok(())
    }

    /// Remove the oldest item.
    pub fn get(&self) -> Result<T, QueueError> {
        let mut ring = self.inner.lock();
        if ring.count == 0 {
            return Err(QueueError::Empty);
        }
        let at = ring.read;
        let item = ring.slots[at].take();
        ring.read = (at + 1) % self.capacity;
        ring.count -= 1;
        debug_assert!(item.is_some(), "ring slot {} empty with count > 0", at);
        item.ok_or(QueueError::Empty)
    }

    /// Remove every item, oldest first, in one critical section.
    pub fn drain_all(&self) -> Vec<T> {
        let mut ring = self.inner.lock();
        let mut out = Vec::with_capacity(ring.count);
        while ring.count > 0 {
            let at = ring.read;
            if let Some(item) = ring.slots[at].take() {
                out.push(item);
            }
            ring.read = (at + 1) % self.capacity;
            ring.count -= 1;
        }
        debug_assert_eq!(ring.read, ring.write);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_with_wraparound() {
        let ring = RingQueue::new(3);
        ring.put(1).unwrap();
        ring.put(2).unwrap();
        assert_eq!(ring.get(), Ok(1));
        ring.put(3).unwrap();
        ring.put(4).unwrap();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.get(), Ok(2));
        assert_eq!(ring.get(), Ok(3));
        assert_eq!(ring.get(), Ok(4));
        assert_eq!(ring.get(), Err(QueueError::Empty));
    }

    #[test]
    fn test_full_ring_returns_item() {
        let ring = RingQueue::new(1);
        ring.put("a").unwrap();
        let err = ring.put("b").unwrap_err();
        assert_eq!(err.kind, QueueError::RingFull);
        assert_eq!(err.item, "b");
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_drain_all_empties_in_order() {
        let ring = RingQueue::new(4);
        for i in 0..4 {
            ring.put(i).unwrap();
        }
        ring.get().unwrap();
        ring.put(4).unwrap();
        assert_eq!(ring.drain_all(), vec![1, 2, 3, 4]);
        assert!(ring.is_empty());
        assert!(ring.drain_all().is_empty());
        ring.put(9).unwrap();
        assert_eq!(ring.get(), Ok(9));
    }

    #[test]
    fn test_concurrent_producers() {
        let ring = Arc::new(RingQueue::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let ring = ring.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        ring.put(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut all = ring.drain_all();
        assert_eq!(all.len(), 1000);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}

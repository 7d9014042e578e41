//! Reusable connection read buffers
//!
//! A lock-free `ArrayQueue` of `BytesMut`. When the pool is empty a fresh
//! buffer is allocated; oversized buffers are not returned to the pool.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct BufferPool {
    pool: ArrayQueue<BytesMut>,
    capacity: usize,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(size: usize, buffer_capacity: usize) -> Self {
        let pool = ArrayQueue::new(size.max(1));
        for _ in 0..size {
            let _ = pool.push(BytesMut::with_capacity(buffer_capacity));
        }
        BufferPool {
            pool,
            capacity: buffer_capacity,
            misses: AtomicU64::new(0),
        }
    }

    pub fn acquire(&self) -> BytesMut {
        self.pool.pop().unwrap_or_else(|| {
            self.misses.fetch_add(1, Ordering::Relaxed);
            BytesMut::with_capacity(self.capacity)
        })
    }

    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() <= self.capacity * 2 {
            let _ = self.pool.push(buf);
        }
    }

    pub fn available(&self) -> usize {
        self.pool.len()
    }

    /// Acquisitions that found the pool empty
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_reuses() {
        let pool = BufferPool::new(2, 128);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.available(), 0);
        let c = pool.acquire();
        assert_eq!(pool.misses(), 1);
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_oversized_buffer_dropped() {
        let pool = BufferPool::new(1, 16);
        let _ = pool.acquire();
        pool.release(BytesMut::with_capacity(1024));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_released_buffer_is_cleared() {
        let pool = BufferPool::new(1, 64);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"stale");
        pool.release(buf);
        assert!(pool.acquire().is_empty());
    }
}

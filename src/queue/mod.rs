//! Queues used to hand work between threads
//!
//! - [`RingQueue`]: fixed capacity, non-blocking, client-side staging
//! - [`Pipe`]: unbounded, blocking pop, explicit intake close, daemon stages

pub mod pipe;
pub mod ring;

pub use pipe::Pipe;
pub use ring::RingQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    RingFull,
    Empty,
    Closed,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::RingFull => write!(f, "ring buffer full"),
            QueueError::Empty => write!(f, "queue empty"),
            QueueError::Closed => write!(f, "queue intake closed"),
        }
    }
}

impl std::error::Error for QueueError {}

/// A rejected enqueue; the item is handed back to the caller.
#[derive(Debug)]
pub struct PutError<T> {
    pub kind: QueueError,
    pub item: T,
}

impl<T> std::fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl<T: std::fmt::Debug> std::error::Error for PutError<T> {}

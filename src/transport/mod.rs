//! Cloud-sync transport boundary
//!
//! `send` delivers one buffer and waits for the peer's reply. `enqueue`
//! stages a buffer without blocking; `flush` delivers everything staged.
//! `finalize` flushes and refuses further work.

pub mod memory;
pub mod tcp;

pub use memory::MemoryTransport;
pub use tcp::{round_trip, TcpForwarder};

use bytes::Bytes;
use std::io::Error as IoError;

#[derive(Debug)]
pub enum TransportError {
    Connect { addr: String, source: IoError },
    Io(IoError),
    /// The peer closed the connection without replying
    EmptyReply,
    Finalized,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect { addr, source } => {
                write!(f, "connect to {} failed: {}", addr, source)
            }
            TransportError::Io(e) => write!(f, "transport I/O error: {}", e),
            TransportError::EmptyReply => write!(f, "peer closed without replying"),
            TransportError::Finalized => write!(f, "transport already finalized"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<IoError> for TransportError {
    fn from(e: IoError) -> Self {
        TransportError::Io(e)
    }
}

/// Outcome of delivering a staged batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub delivered: usize,
    /// Buffers dropped after a transport error
    pub dropped: usize,
}

pub trait Transport: Send + 'static {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    fn enqueue(&mut self, buf: Bytes) -> Result<(), TransportError>;

    /// Deliver every enqueued buffer in order. A buffer whose delivery
    /// fails is dropped and counted; later buffers are still attempted.
    fn flush(&mut self) -> FlushOutcome;

    fn finalize(&mut self) -> Result<FlushOutcome, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        (**self).send(buf)
    }

    fn enqueue(&mut self, buf: Bytes) -> Result<(), TransportError> {
        (**self).enqueue(buf)
    }

    fn flush(&mut self) -> FlushOutcome {
        (**self).flush()
    }

    fn finalize(&mut self) -> Result<FlushOutcome, TransportError> {
        (**self).finalize()
    }
}

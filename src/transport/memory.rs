//! Transport that records buffers instead of sending them

use super::{FlushOutcome, Transport, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    delivered: Vec<Bytes>,
    pending: Vec<Bytes>,
    flushes: u64,
    finalized: bool,
    fail_sends: bool,
}

/// Clones share state, so a test keeps a handle after handing one to the daemon.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later delivery fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }

    pub fn delivered(&self) -> Vec<Bytes> {
        self.inner.lock().delivered.clone()
    }

    pub fn flush_count(&self) -> u64 {
        self.inner.lock().flushes
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.lock().finalized
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.finalized {
            return Err(TransportError::Finalized);
        }
        if inner.fail_sends {
            return Err(TransportError::EmptyReply);
        }
        inner.delivered.push(Bytes::copy_from_slice(buf));
        Ok(())
    }

    fn enqueue(&mut self, buf: Bytes) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.finalized {
            return Err(TransportError::Finalized);
        }
        inner.pending.push(buf);
        Ok(())
    }

    fn flush(&mut self) -> FlushOutcome {
        let mut inner = self.inner.lock();
        inner.flushes += 1;
        let pending = std::mem::take(&mut inner.pending);
        if inner.fail_sends {
            return FlushOutcome {
                delivered: 0,
                dropped: pending.len(),
            };
        }
        let delivered = pending.len();
        inner.delivered.extend(pending);
        FlushOutcome {
            delivered,
            dropped: 0,
        }
    }

    fn finalize(&mut self) -> Result<FlushOutcome, TransportError> {
        if self.is_finalized() {
            return Err(TransportError::Finalized);
        }
        let outcome = self.flush();
        self.inner.lock().finalized = true;
        Ok(outcome)
    }
}

//! Client-side GUID pool refilled from the daemon

use crate::guid::{GuidAllocator, GuidBlock, GuidError, GuidSource};
use crate::protocol::control::{decode_block_reply, guid_block_request};
use crate::transport::round_trip;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Issues ids from the current leased block. When the block runs dry the
/// calling thread sends GUID_BLOCK and waits for the reply.
#[derive(Debug)]
pub struct ClientGuidPool {
    ids: GuidAllocator,
    daemon_addr: String,
    msg_from: AtomicU64,
    refills: AtomicU64,
}

impl ClientGuidPool {
    pub fn new(daemon_addr: impl Into<String>, block: GuidBlock) -> Self {
        ClientGuidPool {
            ids: GuidAllocator::new(block.from, block.to),
            daemon_addr: daemon_addr.into(),
            msg_from: AtomicU64::new(0),
            refills: AtomicU64::new(0),
        }
    }

    /// Sender id stamped on GUID_BLOCK requests.
    pub fn set_msg_from(&self, guid: u64) {
        self.msg_from.store(guid, Ordering::Relaxed);
    }

    pub fn remaining(&self) -> u64 {
        self.ids.remaining()
    }

    /// Blocks leased after the first
    pub fn refills(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }

    fn refill(&self) -> Result<(), GuidError> {
        let msg_from = self.msg_from.load(Ordering::Relaxed);
        let reply = round_trip(&self.daemon_addr, &guid_block_request(msg_from), None)
            .map_err(|e| GuidError::Refill(e.to_string()))?;
        let block = decode_block_reply(&reply).map_err(|e| GuidError::Refill(e.to_string()))?;
        debug!(from = block.from, to = block.to, "GUID block refilled");
        self.ids.refill(block);
        self.refills.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl GuidSource for ClientGuidPool {
    fn next_guid(&self) -> Result<u64, GuidError> {
        match self.ids.next_id() {
            Err(GuidError::Exhausted { .. }) => {
                self.refill()?;
                self.ids.next_id()
            }
            issued => issued,
        }
    }
}

//! State shared by the network thread and every sync stage

use super::buffer_pool::BufferPool;
use super::pub_table::{PubRef, PubTable};
use crate::config::DaemonConfig;
use crate::error::SosError;
use crate::guid::GuidAllocator;
use crate::pubs::Status;
use crate::queue::Pipe;
use crate::wire::MsgType;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error};

/// Work handed from local-sync to db-sync: the pub whose new rows and
/// queued snapshots should be persisted
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub pub_guid: u64,
    pub msg_type: MsgType,
    pub entry: PubRef,
}

#[derive(Debug, Default)]
pub struct DaemonStats {
    pub connections: AtomicU64,
    pub queued: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub applied: AtomicU64,
    pub batches_committed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub rows_persisted: AtomicU64,
    pub forwarded: AtomicU64,
    pub forward_dropped: AtomicU64,
}

/// Point-in-time copy of [`DaemonStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub queued: u64,
    pub protocol_errors: u64,
    pub applied: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub rows_persisted: u64,
    pub forwarded: u64,
    pub forward_dropped: u64,
}

impl DaemonStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            connections: load(&self.connections),
            queued: load(&self.queued),
            protocol_errors: load(&self.protocol_errors),
            applied: load(&self.applied),
            batches_committed: load(&self.batches_committed),
            batches_failed: load(&self.batches_failed),
            rows_persisted: load(&self.rows_persisted),
            forwarded: load(&self.forwarded),
            forward_dropped: load(&self.forward_dropped),
        }
    }
}

pub struct DaemonContext {
    pub config: DaemonConfig,
    /// This daemon's own id, used as `msg_from` on forwarded notices
    pub my_guid: u64,
    pub guids: GuidAllocator,
    pub pubs: PubTable,
    pub local_pipe: Pipe<Bytes>,
    pub db_pipe: Pipe<SyncTask>,
    /// Present only when an upstream target is configured
    pub cloud_pipe: Option<Pipe<Bytes>>,
    pub buffers: BufferPool,
    pub stats: DaemonStats,
    local_addr: SocketAddr,
    running: AtomicBool,
    status: Mutex<Status>,
    fatal: Mutex<Option<SosError>>,
}

impl DaemonContext {
    pub(crate) fn new(
        config: DaemonConfig,
        guids: GuidAllocator,
        local_addr: SocketAddr,
        with_cloud: bool,
    ) -> Result<Self, SosError> {
        let my_guid = guids.next_id()?;
        let buffers = BufferPool::new(config.buffer_pool_size, config.buffer_capacity);
        Ok(DaemonContext {
            config,
            my_guid,
            guids,
            pubs: PubTable::new(),
            local_pipe: Pipe::new(),
            db_pipe: Pipe::new(),
            cloud_pipe: with_cloud.then(Pipe::new),
            buffers,
            stats: DaemonStats::default(),
            local_addr,
            running: AtomicBool::new(true),
            status: Mutex::new(Status::Init),
            fatal: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: Status) {
        *self.status.lock() = status;
    }

    /// Clear the running flag. The accept loop notices on its next wake.
    pub fn stop_running(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.set_status(Status::Halting);
            debug!("running flag cleared");
        }
    }

    /// Stop and unblock `accept` with a throwaway self-connection.
    pub fn request_shutdown(&self) {
        self.stop_running();
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            debug!(error = %e, "wake connection failed; listener likely closed");
        }
    }

    /// Record an unrecoverable error and stop the daemon. Only the first
    /// error is kept.
    pub(crate) fn fail(&self, err: SosError) {
        error!(error = %err, kind = ?err.kind(), "fatal daemon error");
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.stop_running();
    }

    pub(crate) fn take_fatal(&self) -> Option<SosError> {
        self.fatal.lock().take()
    }
}

impl std::fmt::Debug for DaemonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonContext")
            .field("my_guid", &self.my_guid)
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("pubs", &self.pubs.len())
            .finish()
    }
}

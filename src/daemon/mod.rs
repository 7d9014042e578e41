//! Daemon Sync Pipeline
//!
//! ```text
//! network ──► local_pipe ──► local-sync ──┬─► db_pipe ────► db-sync ───► Store
//!                                         └─► cloud_pipe ─► cloud-sync ► Transport
//! ```
//!
//! Every stage is one named OS thread. Stages exit when their intake pipe
//! is closed and empty; [`DaemonHandle::join`] closes the pipes in pipeline
//! order and joins each stage before returning.

pub mod buffer_pool;
mod cloud_sync;
pub mod context;
pub mod db_sync;
mod handlers;
mod listener;
pub(crate) mod local_sync;
pub mod pub_table;

pub use buffer_pool::BufferPool;
pub use context::{DaemonContext, DaemonStats, StatsSnapshot, SyncTask};
pub use db_sync::{persist_batch, BatchOutcome};
pub use pub_table::{PubEntry, PubRef, PubTable};

use crate::config::DaemonConfig;
use crate::error::SosError;
use crate::guid::GuidAllocator;
use crate::protocol::control::shutdown_request;
use crate::pubs::Status;
use crate::store::{InMemoryStore, LocalFileStore, Store};
use crate::transport::{TcpForwarder, Transport};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

pub struct Daemon;

impl Daemon {
    /// Bind the listener and spawn every stage.
    ///
    /// A cloud-sync stage runs only when `transport` is given.
    pub fn start(
        config: DaemonConfig,
        store: Box<dyn Store>,
        transport: Option<Box<dyn Transport>>,
    ) -> Result<DaemonHandle, SosError> {
        config.validate()?;
        let socket = TcpListener::bind(&config.listen_addr)?;
        let local_addr = socket.local_addr()?;

        let guids = GuidAllocator::for_rank(config.uid_max, config.comm_rank, config.comm_size);
        let (first, last) = guids.bounds();
        let ctx = Arc::new(DaemonContext::new(
            config,
            guids,
            local_addr,
            transport.is_some(),
        )?);
        info!(
            addr = %local_addr,
            role = %ctx.config.role,
            rank = ctx.config.comm_rank,
            my_guid = ctx.my_guid,
            guid_first = first,
            guid_last = last,
            cloud = transport.is_some(),
            "daemon starting"
        );

        let local = spawn("sos-local-sync", {
            let ctx = ctx.clone();
            move || local_sync::run_local_sync(ctx)
        })?;
        let db = spawn("sos-db-sync", {
            let ctx = ctx.clone();
            move || db_sync::run_db_sync(ctx, store)
        })?;
        let cloud = match transport {
            Some(transport) => Some(spawn("sos-cloud-sync", {
                let ctx = ctx.clone();
                move || cloud_sync::run_cloud_sync(ctx, transport)
            })?),
            None => None,
        };
        ctx.set_status(Status::Running);
        let network = spawn("sos-network", {
            let ctx = ctx.clone();
            move || listener::run_listener(ctx, socket)
        })?;

        Ok(DaemonHandle {
            ctx,
            network: Some(network),
            local: Some(local),
            db: Some(db),
            cloud,
        })
    }

    /// Start with the store and transport named by `config`.
    pub fn start_from_config(config: DaemonConfig) -> Result<DaemonHandle, SosError> {
        let store: Box<dyn Store> = match &config.db_path {
            Some(path) => Box::new(LocalFileStore::open(path)?),
            None => {
                warn!("no db_path configured, values are kept in memory only");
                Box::new(InMemoryStore::new())
            }
        };
        let transport: Option<Box<dyn Transport>> = config.cloud_target.as_ref().map(|target| {
            Box::new(TcpForwarder::new(target.clone(), Some(config.cloud_timeout)))
                as Box<dyn Transport>
        });
        Self::start(config, store, transport)
    }

    /// Run until a SHUTDOWN message arrives or a fatal error stops the daemon.
    pub fn run(config: DaemonConfig) -> Result<(), SosError> {
        Self::start_from_config(config)?.join()
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>, SosError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(SosError::Io)
}

/// A running daemon. Dropping the handle shuts the daemon down and waits
/// for every stage.
pub struct DaemonHandle {
    ctx: Arc<DaemonContext>,
    network: Option<JoinHandle<()>>,
    local: Option<JoinHandle<()>>,
    db: Option<JoinHandle<()>>,
    cloud: Option<JoinHandle<()>>,
}

impl DaemonHandle {
    pub fn addr(&self) -> SocketAddr {
        self.ctx.local_addr()
    }

    pub fn context(&self) -> &Arc<DaemonContext> {
        &self.ctx
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Ask the accept loop to stop. Returns immediately; use [`join`] to
    /// wait for the pipeline to drain.
    ///
    /// [`join`]: DaemonHandle::join
    pub fn shutdown(&self) {
        self.ctx.request_shutdown();
    }

    /// Wait for the accept loop to exit, then drain and join each stage in
    /// pipeline order. Returns the fatal error that stopped the daemon, if
    /// any.
    pub fn join(mut self) -> Result<(), SosError> {
        self.join_stages();
        match self.ctx.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn join_stages(&mut self) {
        join_stage("sos-network", self.network.take());

        self.ctx.local_pipe.close_intake();
        join_stage("sos-local-sync", self.local.take());

        self.ctx.db_pipe.close_intake();
        join_stage("sos-db-sync", self.db.take());

        if let Some(cloud) = &self.ctx.cloud_pipe {
            if cloud.push(shutdown_request(self.ctx.my_guid)).is_err() {
                warn!("cloud-sync closed before shutdown notice");
            }
            cloud.close_intake();
        }
        join_stage("sos-cloud-sync", self.cloud.take());

        self.ctx.set_status(Status::Shutdown);
        info!(stats = ?self.ctx.stats.snapshot(), "daemon stopped");
    }
}

fn join_stage(name: &str, handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            warn!(stage = name, "stage panicked");
        }
    }
}

impl Drop for DaemonHandle {
    fn drop(&mut self) {
        if self.network.is_none() && self.local.is_none() && self.db.is_none() {
            return;
        }
        self.ctx.request_shutdown();
        self.join_stages();
    }
}

impl std::fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("addr", &self.addr())
            .field("status", &self.ctx.status())
            .finish()
    }
}

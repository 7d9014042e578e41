//! Client runtime
//!
//! Registers with a daemon, builds pubs, and sends ANNOUNCE / PUBLISH /
//! VAL_SNAPS. Every message uses its own connection: connect, write, read
//! the reply until the daemon closes.
//!
//! ```no_run
//! use sos_telemetry::client::Client;
//! use sos_telemetry::config::ClientConfig;
//!
//! let client = Client::connect(ClientConfig::from_env())?;
//! let mut p = client.new_pub("example")?;
//! client.pack(&mut p, "iteration", 1)?;
//! client.publish(&mut p)?;
//! # Ok::<(), sos_telemetry::error::SosError>(())
//! ```

mod guid_pool;

pub use guid_pool::ClientGuidPool;

use crate::config::ClientConfig;
use crate::error::SosError;
use crate::guid::GuidSource;
use crate::protocol::control::{
    check_in_request, echo_request, is_ack, register_request, shutdown_request, RegisterReply,
};
use crate::protocol::{
    announce_to_buffer, publish_to_buffer, val_snaps_to_buffer, ProtocolError, SHUTDOWN_REPLY,
};
use crate::pubs::{Pub, Value, ValueSnapshot};
use crate::queue::{QueueError, RingQueue};
use crate::transport::{round_trip, FlushOutcome};
use bytes::Bytes;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info, warn};

static NEXT_THREAD: AtomicI32 = AtomicI32::new(1);

thread_local! {
    static THREAD_ORDINAL: i32 = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
}

pub struct Client {
    config: ClientConfig,
    my_guid: u64,
    guids: ClientGuidPool,
    send_ring: RingQueue<Bytes>,
}

impl Client {
    /// Register as a new client and take this client's own id from the
    /// leased block.
    pub fn connect(config: ClientConfig) -> Result<Self, SosError> {
        let reply = round_trip(&config.daemon_addr, &register_request(0), None)?;
        let block = match RegisterReply::decode(&reply)? {
            RegisterReply::Block(block) => block,
            RegisterReply::Ack => {
                return Err(ProtocolError::MalformedReply(
                    "REGISTER acknowledged without a GUID block".to_string(),
                )
                .into())
            }
        };

        let guids = ClientGuidPool::new(config.daemon_addr.clone(), block);
        let my_guid = guids.next_guid()?;
        guids.set_msg_from(my_guid);
        info!(
            daemon = %config.daemon_addr,
            my_guid,
            block_from = block.from,
            block_to = block.to,
            "registered"
        );

        let send_ring = RingQueue::new(config.send_ring_capacity);
        Ok(Client {
            config,
            my_guid,
            guids,
            send_ring,
        })
    }

    pub fn my_guid(&self) -> u64 {
        self.my_guid
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn guids(&self) -> &ClientGuidPool {
        &self.guids
    }

    /// A pub with a fresh GUID and this client's identity fields.
    pub fn new_pub(&self, title: &str) -> Result<Pub, SosError> {
        let mut p = Pub::new(title);
        p.guid = self.guids.next_guid()?;
        p.node_id = self.config.node_id.clone();
        p.process_id = self.config.process_id;
        p.thread_id = THREAD_ORDINAL.with(|t| *t);
        p.comm_rank = self.config.comm_rank;
        p.prog_name = self.config.prog_name.clone();
        p.prog_ver = self.config.prog_ver.clone();
        Ok(p)
    }

    /// Pack a value, drawing any new element GUID from this client's pool.
    pub fn pack(
        &self,
        pub_: &mut Pub,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<usize, SosError> {
        Ok(pub_.pack(&self.guids, name, value)?)
    }

    pub fn announce(&self, pub_: &mut Pub) -> Result<(), SosError> {
        let msg = announce_to_buffer(pub_, self.my_guid)?;
        self.send_expect_ack(&msg)?;
        pub_.mark_announced();
        debug!(pub_guid = pub_.guid, elems = pub_.elem_count(), "announced");
        Ok(())
    }

    /// Announce first if the schema changed, then send the dirty values.
    /// Returns `false` when nothing was dirty and no message was sent.
    ///
    /// Values become CLEAN only once the daemon has acknowledged them; after
    /// an error they are still dirty and go out with the next publish.
    pub fn publish(&self, pub_: &mut Pub) -> Result<bool, SosError> {
        if !pub_.is_announced() {
            self.announce(pub_)?;
        }
        let Some(out) = publish_to_buffer(pub_, self.my_guid)? else {
            return Ok(false);
        };
        self.send_expect_ack(&out.msg)?;
        out.mark_sent(pub_);
        Ok(true)
    }

    /// Returns `false` for an empty batch.
    pub fn send_val_snaps(&self, pub_guid: u64, snaps: &[ValueSnapshot]) -> Result<bool, SosError> {
        let Some(msg) = val_snaps_to_buffer(pub_guid, self.my_guid, snaps)? else {
            return Ok(false);
        };
        self.send_expect_ack(&msg)?;
        Ok(true)
    }

    /// Returns the daemon's reply, which is the whole ECHO message.
    pub fn echo(&self, payload: &[u8]) -> Result<Vec<u8>, SosError> {
        let msg = echo_request(self.my_guid, payload)?;
        Ok(self.request(&msg)?)
    }

    pub fn check_in(&self) -> Result<(), SosError> {
        self.send_expect_ack(&check_in_request(self.my_guid))
    }

    /// Ask the daemon to stop.
    pub fn shutdown_daemon(&self) -> Result<(), SosError> {
        let reply = self.request(&shutdown_request(self.my_guid))?;
        if reply != SHUTDOWN_REPLY {
            return Err(ProtocolError::MalformedReply(format!(
                "unexpected SHUTDOWN reply of {} bytes",
                reply.len()
            ))
            .into());
        }
        Ok(())
    }

    /// Serialize a PUBLISH into the send ring for a later
    /// [`Client::flush_staged`]. Values become CLEAN once the buffer is in
    /// the ring; on `RingFull` they stay dirty.
    pub fn stage_publish(&self, pub_: &mut Pub) -> Result<bool, SosError> {
        if self.send_ring.len() >= self.send_ring.capacity() {
            return Err(QueueError::RingFull.into());
        }
        if !pub_.is_announced() {
            self.announce(pub_)?;
        }
        let Some(out) = publish_to_buffer(pub_, self.my_guid)? else {
            return Ok(false);
        };
        // Another thread may have filled the ring since the check above.
        self.send_ring
            .put(out.msg.clone())
            .map_err(|rejected| rejected.kind)?;
        out.mark_sent(pub_);
        Ok(true)
    }

    pub fn staged(&self) -> usize {
        self.send_ring.len()
    }

    /// Send every staged buffer in order. A buffer the daemon does not
    /// acknowledge is dropped and counted. Its values were marked CLEAN when
    /// staged and are not re-sent unless packed again; staging trades that
    /// loss for not holding the pub until the flush.
    pub fn flush_staged(&self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        for msg in self.send_ring.drain_all() {
            match self.send_expect_ack(&msg) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(error = %e, "staged publish dropped");
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }

    fn request(&self, msg: &[u8]) -> Result<Vec<u8>, SosError> {
        Ok(round_trip(&self.config.daemon_addr, msg, None)?)
    }

    fn send_expect_ack(&self, msg: &[u8]) -> Result<(), SosError> {
        let reply = self.request(msg)?;
        if !is_ack(&reply) {
            return Err(ProtocolError::MalformedReply(format!(
                "expected ACK, got {:?}",
                String::from_utf8_lossy(&reply)
            ))
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("daemon_addr", &self.config.daemon_addr)
            .field("my_guid", &self.my_guid)
            .field("staged", &self.send_ring.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::daemon::{Daemon, DaemonHandle};
    use crate::store::InMemoryStore;

    fn daemon() -> DaemonHandle {
        Daemon::start(DaemonConfig::test(), Box::new(InMemoryStore::new()), None).unwrap()
    }

    #[test]
    fn test_connect_leases_block() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        assert!(client.my_guid() > d.context().my_guid);
        assert!(client.guids().remaining() > 0);
    }

    #[test]
    fn test_pool_refills_when_block_runs_dry() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        let mut p = client.new_pub("wide").unwrap();
        let mut seen = ahash::AHashSet::new();
        seen.insert(p.guid);
        for i in 0..40 {
            let slot = client.pack(&mut p, &format!("e{}", i), i).unwrap();
            assert!(seen.insert(p.data()[slot].guid), "GUID reissued");
        }
        assert!(client.guids().refills() >= 2);
    }

    #[test]
    fn test_publish_without_changes_sends_nothing() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        let mut p = client.new_pub("T").unwrap();
        client.pack(&mut p, "x", 42).unwrap();
        assert!(client.publish(&mut p).unwrap());
        assert!(p.is_announced());
        assert!(!client.publish(&mut p).unwrap());
    }

    #[test]
    fn test_failed_publish_keeps_values_dirty() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        let mut p = client.new_pub("T").unwrap();
        client.pack(&mut p, "x", 42).unwrap();
        assert!(client.publish(&mut p).unwrap());
        d.shutdown();
        d.join().unwrap();

        client.pack(&mut p, "x", 43).unwrap();
        assert!(client.publish(&mut p).is_err());
        assert_eq!(p.dirty_count(), 1);
        assert_eq!(p.data()[0].state, crate::pubs::ValState::Dirty);
        assert_eq!(p.get_value("x"), Some(&Value::Int(43)));
    }

    #[test]
    fn test_failed_announce_keeps_pub_unannounced() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        d.shutdown();
        d.join().unwrap();

        let mut p = client.new_pub("T").unwrap();
        client.pack(&mut p, "x", 1).unwrap();
        assert!(client.publish(&mut p).is_err());
        assert!(!p.is_announced());
        assert_eq!(p.dirty_count(), 1);
    }

    #[test]
    fn test_stage_then_flush() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        let mut p = client.new_pub("T").unwrap();
        for i in 0..8 {
            client.pack(&mut p, "x", i).unwrap();
            assert!(client.stage_publish(&mut p).unwrap());
        }
        client.pack(&mut p, "x", 99).unwrap();
        let err = client.stage_publish(&mut p).unwrap_err();
        assert!(matches!(err, SosError::Queue(QueueError::RingFull)));
        assert_eq!(p.dirty_count(), 1);

        let outcome = client.flush_staged();
        assert_eq!(outcome.delivered, 8);
        assert_eq!(client.staged(), 0);
    }

    #[test]
    fn test_shutdown_and_check_in() {
        let d = daemon();
        let client = Client::connect(ClientConfig::test(d.addr().to_string())).unwrap();
        client.check_in().unwrap();
        assert_eq!(client.echo(b"hi").unwrap().len(), crate::wire::HEADER_LEN + 2);
        client.shutdown_daemon().unwrap();
        d.join().unwrap();
    }
}

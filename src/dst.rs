//! Deterministic Simulation Testing for the pub sync path
//!
//! Shadow-state harness that drives client pubs through announce, publish
//! and db-sync against a fault-injecting store:
//! - Deterministic random operation generation
//! - Invariant checking after each operation
//! - Seed-based reproducibility for debugging
//!
//! Messages are applied in-process through the same local-sync and db-sync
//! code the daemon threads run, so no sockets are involved.

use crate::config::DaemonConfig;
use crate::daemon::db_sync::persist_batch;
use crate::daemon::local_sync::apply_message;
use crate::daemon::{DaemonContext, SyncTask};
use crate::guid::{GuidAllocator, GuidError, GuidSource};
use crate::protocol::{announce_to_buffer, publish_to_buffer_at};
use crate::pubs::{Pub, Value};
use crate::sim::SimulatedRng;
use crate::store::{InMemoryStore, SimulatedStore, SimulatedStoreConfig};
use ahash::AHashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration for pub sync DST
#[derive(Debug, Clone)]
pub struct PubSyncDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Client pubs in play
    pub num_pubs: usize,
    /// Distinct element names per pub
    pub names_per_pub: usize,
    /// Ids leased per GUID block; small values force frequent refills
    pub guid_block_size: u64,
    pub publish_prob: f64,
    pub sync_prob: f64,
    pub malformed_prob: f64,
    pub store: SimulatedStoreConfig,
}

impl Default for PubSyncDSTConfig {
    fn default() -> Self {
        PubSyncDSTConfig {
            seed: 0,
            num_pubs: 4,
            names_per_pub: 12,
            guid_block_size: 16,
            publish_prob: 0.3,
            sync_prob: 0.15,
            malformed_prob: 0.05,
            store: SimulatedStoreConfig::default(),
        }
    }
}

impl PubSyncDSTConfig {
    pub fn new(seed: u64) -> Self {
        PubSyncDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Every store call may fail
    pub fn high_chaos(seed: u64) -> Self {
        PubSyncDSTConfig {
            seed,
            store: SimulatedStoreConfig::high_chaos(),
            ..Default::default()
        }
    }

    /// Tiny blocks and wide pubs (many refills)
    pub fn tiny_blocks(seed: u64) -> Self {
        PubSyncDSTConfig {
            seed,
            num_pubs: 6,
            names_per_pub: 40,
            guid_block_size: 2,
            ..Default::default()
        }
    }
}

/// Operation type for logging
#[derive(Debug, Clone)]
pub enum PubSyncOp {
    Pack { pub_idx: usize, name: String },
    Publish { pub_idx: usize },
    Malformed { pub_idx: usize },
    Sync { tasks: usize },
}

/// Result of a pub sync DST run
#[derive(Debug, Clone)]
pub struct PubSyncDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub packs: u64,
    pub publishes: u64,
    pub empty_publishes: u64,
    pub rejected: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub values_committed: u64,
    pub refills: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<PubSyncOp>,
}

impl PubSyncDSTResult {
    pub fn new(seed: u64) -> Self {
        PubSyncDSTResult {
            seed,
            total_operations: 0,
            packs: 0,
            publishes: 0,
            empty_publishes: 0,
            rejected: 0,
            batches_committed: 0,
            batches_failed: 0,
            values_committed: 0,
            refills: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (packs:{}, publishes:{}, empty:{}, rejected:{}, batches:{}/{} failed, values:{}, refills:{}), {} violations",
            self.seed,
            self.total_operations,
            self.packs,
            self.publishes,
            self.empty_publishes,
            self.rejected,
            self.batches_committed,
            self.batches_failed,
            self.values_committed,
            self.refills,
            self.invariant_violations.len()
        )
    }
}

/// Client pool that leases straight from the daemon's allocator
struct LeasedPool {
    ids: GuidAllocator,
    daemon: Arc<DaemonContext>,
    block_size: u64,
    refills: AtomicU64,
}

impl GuidSource for LeasedPool {
    fn next_guid(&self) -> Result<u64, GuidError> {
        match self.ids.next_id() {
            Err(GuidError::Exhausted { .. }) => {
                let block = self.daemon.guids.claim_block(self.block_size)?;
                self.ids.refill(block);
                self.refills.fetch_add(1, Ordering::Relaxed);
                self.ids.next_id()
            }
            issued => issued,
        }
    }
}

/// DST harness for the announce / publish / persist path
pub struct PubSyncDSTHarness {
    config: PubSyncDSTConfig,
    rng: SimulatedRng,
    ctx: Arc<DaemonContext>,
    pool: LeasedPool,
    my_guid: u64,
    pubs: Vec<Pub>,
    store: SimulatedStore<InMemoryStore>,
    /// Shares tables with the store's inner `InMemoryStore`
    store_view: InMemoryStore,
    pending: Vec<SyncTask>,
    issued: AHashSet<u64>,
    clock: f64,
    result: PubSyncDSTResult,
}

impl PubSyncDSTHarness {
    pub fn new(config: PubSyncDSTConfig) -> Self {
        let mut rng = SimulatedRng::new(config.seed);
        let daemon_config = DaemonConfig {
            guid_block_size: config.guid_block_size,
            ..DaemonConfig::test()
        };
        let guids = GuidAllocator::for_rank(daemon_config.uid_max, 0, 1);
        let local_addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
        let ctx = match DaemonContext::new(daemon_config, guids, local_addr, false) {
            Ok(ctx) => Arc::new(ctx),
            Err(e) => panic!("daemon context for seed {}: {}", config.seed, e),
        };

        let pool = LeasedPool {
            ids: GuidAllocator::empty(),
            daemon: ctx.clone(),
            block_size: config.guid_block_size,
            refills: AtomicU64::new(0),
        };
        let mut result = PubSyncDSTResult::new(config.seed);
        let mut issued = AHashSet::new();
        issued.insert(ctx.my_guid);

        let mut take = |what: &str| match pool.next_guid() {
            Ok(id) => {
                if !issued.insert(id) {
                    result
                        .invariant_violations
                        .push(format!("{} GUID {} issued twice", what, id));
                }
                id
            }
            Err(e) => {
                result
                    .invariant_violations
                    .push(format!("{} GUID unavailable: {}", what, e));
                0
            }
        };
        let my_guid = take("client");
        let pubs = (0..config.num_pubs)
            .map(|i| {
                let mut p = Pub::with_chunk(format!("pub-{}", i), 4);
                p.guid = take("pub");
                p.node_id = "dst-node".to_string();
                p.prog_name = "dst".to_string();
                p
            })
            .collect();

        let store_view = InMemoryStore::new();
        let store_rng = SimulatedRng::new(rng.next_u64());
        let store = SimulatedStore::new(store_view.clone(), store_rng, config.store.clone());

        PubSyncDSTHarness {
            config,
            rng,
            ctx,
            pool,
            my_guid,
            pubs,
            store,
            store_view,
            pending: Vec::new(),
            issued,
            clock: 1.0,
            result,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(PubSyncDSTConfig::new(seed))
    }

    fn tick(&mut self) -> f64 {
        self.clock += 0.001;
        self.clock
    }

    fn violation(&mut self, msg: String) {
        self.result.invariant_violations.push(format!(
            "Op #{}: {:?} - {}",
            self.result.total_operations, self.result.last_op, msg
        ));
    }

    fn random_value(&mut self, name_idx: usize) -> Value {
        let raw = self.rng.gen_range(0, 1000);
        match name_idx % 3 {
            0 => Value::Int(raw as i32),
            1 => Value::Long(raw as i64 * 1_000_000),
            _ => Value::Double(raw as f64 / 8.0),
        }
    }

    fn run_single_op(&mut self) {
        let pub_idx = self.rng.gen_range(0, self.pubs.len() as u64) as usize;
        let roll = self.rng.gen_f64();
        let publish_edge = self.config.publish_prob;
        let sync_edge = publish_edge + self.config.sync_prob;
        let malformed_edge = sync_edge + self.config.malformed_prob;

        if roll < publish_edge {
            self.do_publish(pub_idx);
        } else if roll < sync_edge {
            self.do_sync();
        } else if roll < malformed_edge {
            self.do_malformed(pub_idx);
        } else {
            self.do_pack(pub_idx);
        }
        self.result.total_operations += 1;
    }

    fn do_pack(&mut self, pub_idx: usize) {
        let name_idx = self.rng.gen_range(0, self.config.names_per_pub as u64) as usize;
        let name = format!("e{}", name_idx);
        self.result.last_op = Some(PubSyncOp::Pack {
            pub_idx,
            name: name.clone(),
        });
        let value = self.random_value(name_idx);
        let now = self.tick();

        let before = self.pubs[pub_idx].elem_count();
        match self.pubs[pub_idx].pack_at(&self.pool, &name, value, now) {
            Ok(slot) => {
                self.result.packs += 1;
                if self.pubs[pub_idx].elem_count() > before {
                    let guid = self.pubs[pub_idx].data()[slot].guid;
                    if !self.issued.insert(guid) {
                        self.violation(format!("element GUID {} issued twice", guid));
                    }
                }
            }
            Err(e) => self.violation(format!("pack failed: {}", e)),
        }
    }

    fn apply(&mut self, msg: &[u8]) -> Option<SyncTask> {
        let now = self.tick();
        match apply_message(&self.ctx, msg, now) {
            Ok(task) => Some(task),
            Err(e) => {
                self.violation(format!("well-formed message rejected: {}", e));
                None
            }
        }
    }

    fn do_publish(&mut self, pub_idx: usize) {
        self.result.last_op = Some(PubSyncOp::Publish { pub_idx });

        if !self.pubs[pub_idx].is_announced() {
            let msg = match announce_to_buffer(&self.pubs[pub_idx], self.my_guid) {
                Ok(msg) => msg,
                Err(e) => return self.violation(format!("announce encode failed: {}", e)),
            };
            let Some(task) = self.apply(&msg) else {
                return;
            };
            self.pending.push(task);
            self.pubs[pub_idx].mark_announced();
        }

        let now = self.tick();
        let out = match publish_to_buffer_at(&self.pubs[pub_idx], self.my_guid, now) {
            Ok(Some(out)) => out,
            Ok(None) => {
                self.result.empty_publishes += 1;
                return;
            }
            Err(e) => return self.violation(format!("publish encode failed: {}", e)),
        };
        let Some(task) = self.apply(&out.msg) else {
            return;
        };
        out.mark_sent(&mut self.pubs[pub_idx]);
        self.pending.push(task);
        self.result.publishes += 1;

        if let Err(msg) = self.check_mirrored(pub_idx) {
            self.violation(msg);
        }
    }

    /// Truncate a real ANNOUNCE and patch its size so only the body is
    /// short. The daemon must reject it without changing anything.
    fn do_malformed(&mut self, pub_idx: usize) {
        self.result.last_op = Some(PubSyncOp::Malformed { pub_idx });
        let msg = match announce_to_buffer(&self.pubs[pub_idx], self.my_guid) {
            Ok(msg) => msg,
            Err(e) => return self.violation(format!("announce encode failed: {}", e)),
        };
        let header_len = crate::wire::HEADER_LEN;
        let body = msg.len() - header_len;
        let cut = self.rng.gen_range(1, body as u64 + 1) as usize;
        let mut bad = msg[..msg.len() - cut].to_vec();
        let size = bad.len() as i32;
        bad[..4].copy_from_slice(&size.to_be_bytes());

        let guid = self.pubs[pub_idx].guid;
        let before = self.ctx.pubs.snapshot(guid).map(|p| fingerprint(&p));
        let now = self.tick();
        match apply_message(&self.ctx, &bad, now) {
            Ok(_) => self.violation(format!("truncated announce ({} bytes cut) accepted", cut)),
            Err(_) => self.result.rejected += 1,
        }
        let after = self.ctx.pubs.snapshot(guid).map(|p| fingerprint(&p));
        if before != after {
            self.violation(format!("rejected announce changed pub {}", guid));
        }
    }

    fn do_sync(&mut self) {
        let tasks = std::mem::take(&mut self.pending);
        self.result.last_op = Some(PubSyncOp::Sync { tasks: tasks.len() });
        if tasks.is_empty() {
            return;
        }

        let rows_before = self.store_view.rows().len();
        match persist_batch(&mut self.store, &tasks) {
            Ok(outcome) => {
                if outcome.total() > 0 {
                    self.result.batches_committed += 1;
                }
                self.result.values_committed += outcome.values as u64;
                let grown = self.store_view.rows().len() - rows_before;
                if grown != outcome.total() {
                    self.violation(format!(
                        "batch reported {} rows but store grew by {}",
                        outcome.total(),
                        grown
                    ));
                }
            }
            Err(_) => {
                self.result.batches_failed += 1;
                let rows_after = self.store_view.rows().len();
                if rows_after != rows_before {
                    self.violation(format!(
                        "failed batch left {} rows visible",
                        rows_after - rows_before
                    ));
                }
            }
        }
        if self.store_view.in_transaction() {
            self.violation("transaction left open after batch".to_string());
        }
        if let Err(msg) = self.check_store() {
            self.violation(msg);
        }
    }

    /// Daemon copy holds exactly the client's last published values.
    fn check_mirrored(&self, pub_idx: usize) -> Result<(), String> {
        let client = &self.pubs[pub_idx];
        let Some(daemon) = self.ctx.pubs.snapshot(client.guid) else {
            return Err(format!("pub {} missing on daemon", client.guid));
        };
        if daemon.elem_count() != client.elem_count() {
            return Err(format!(
                "elem_count mismatch: daemon={}, client={}",
                daemon.elem_count(),
                client.elem_count()
            ));
        }
        for (slot, (d, c)) in daemon.data().iter().zip(client.data()).enumerate() {
            if d.guid != c.guid || d.val_type != c.val_type {
                return Err(format!("slot {} schema mismatch", slot));
            }
            let same = match (d.value(), c.value()) {
                (Some(a), Some(b)) => a.same_encoding(b),
                (None, None) => true,
                _ => false,
            };
            if !same {
                return Err(format!(
                    "slot {} value mismatch: daemon={:?}, client={:?}",
                    slot,
                    d.value(),
                    c.value()
                ));
            }
        }
        Ok(())
    }

    fn check_store(&self) -> Result<(), String> {
        let values = self.store_view.value_rows().len() as u64;
        if values != self.result.values_committed {
            return Err(format!(
                "value rows mismatch: store={}, committed={}",
                values, self.result.values_committed
            ));
        }
        let mut pubs = AHashSet::new();
        for row in self.store_view.pub_rows() {
            if !pubs.insert(row.guid) {
                return Err(format!("pub {} persisted twice", row.guid));
            }
        }
        Ok(())
    }

    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op();
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
        self.result.refills = self.pool.refills.load(Ordering::Relaxed);
    }

    pub fn result(&self) -> &PubSyncDSTResult {
        &self.result
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store_view
    }
}

/// Element GUIDs and encoded values, for detecting unintended mutation
fn fingerprint(p: &Pub) -> Vec<(u64, Option<String>)> {
    p.data()
        .iter()
        .map(|d| (d.guid, d.value().map(|v| format!("{:?}", v))))
        .collect()
}

/// Run a batch of DST tests
pub fn run_pub_sync_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> PubSyncDSTConfig,
) -> Vec<PubSyncDSTResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let mut harness = PubSyncDSTHarness::new(config_fn(seed));
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_pub_sync_batch(results: &[PubSyncDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_values: u64 = results.iter().map(|r| r.values_committed).sum();

    let mut summary = format!(
        "Pub Sync DST Summary\n\
         ====================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n\
         Values committed: {}\n",
        total, passed, failed, total_ops, total_values
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}

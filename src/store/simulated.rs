//! Fault-injecting store wrapper for deterministic simulation

use super::{Store, StoreError};
use crate::pubs::{Pub, ValueSnapshot};
use crate::sim::SimulatedRng;
use parking_lot::Mutex;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    pub begin_fail_prob: f64,
    pub insert_fail_prob: f64,
    pub commit_fail_prob: f64,
    pub disk_full_prob: f64,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            begin_fail_prob: 0.005,
            insert_fail_prob: 0.01,
            commit_fail_prob: 0.01,
            disk_full_prob: 0.001,
        }
    }
}

impl SimulatedStoreConfig {
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            begin_fail_prob: 0.0,
            insert_fail_prob: 0.0,
            commit_fail_prob: 0.0,
            disk_full_prob: 0.0,
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            begin_fail_prob: 0.02,
            insert_fail_prob: 0.05,
            commit_fail_prob: 0.1,
            disk_full_prob: 0.01,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub begin_failures: u64,
    pub insert_attempts: u64,
    pub insert_failures: u64,
    pub commit_attempts: u64,
    pub commit_failures: u64,
    pub disk_full_errors: u64,
}

struct FaultState {
    rng: SimulatedRng,
    stats: SimulatedStoreStats,
}

/// Wraps `S`, failing calls at the configured rates. A failed commit rolls
/// the inner store back so no rows of the batch become visible.
pub struct SimulatedStore<S: Store> {
    inner: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<FaultState>>,
}

impl<S: Store> SimulatedStore<S> {
    pub fn new(inner: S, rng: SimulatedRng, config: SimulatedStoreConfig) -> Self {
        SimulatedStore {
            inner,
            config,
            state: Arc::new(Mutex::new(FaultState {
                rng,
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// Shared handle to the counters, valid after the store is moved.
    pub fn stats_handle(&self) -> SimulatedStoreStatsHandle {
        SimulatedStoreStatsHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn insert_fault(&self) -> Option<StoreError> {
        let mut s = self.state.lock();
        s.stats.insert_attempts += 1;
        if s.rng.gen_bool(self.config.disk_full_prob) {
            s.stats.disk_full_errors += 1;
            return Some(StoreError::DiskFull);
        }
        if s.rng.gen_bool(self.config.insert_fail_prob) {
            s.stats.insert_failures += 1;
            return Some(StoreError::Io(IoError::new(
                ErrorKind::Other,
                "simulated insert failure",
            )));
        }
        None
    }
}

#[derive(Clone)]
pub struct SimulatedStoreStatsHandle {
    state: Arc<Mutex<FaultState>>,
}

impl SimulatedStoreStatsHandle {
    pub fn get(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }
}

impl<S: Store> Store for SimulatedStore<S> {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        {
            let mut s = self.state.lock();
            if s.rng.gen_bool(self.config.begin_fail_prob) {
                s.stats.begin_failures += 1;
                return Err(StoreError::Io(IoError::new(
                    ErrorKind::Other,
                    "simulated begin failure",
                )));
            }
        }
        self.inner.begin_transaction()
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        let fail = {
            let mut s = self.state.lock();
            s.stats.commit_attempts += 1;
            let fail = s.rng.gen_bool(self.config.commit_fail_prob);
            if fail {
                s.stats.commit_failures += 1;
            }
            fail
        };
        if fail {
            self.inner.rollback_transaction()?;
            return Err(StoreError::CommitFailed("simulated commit failure".into()));
        }
        self.inner.commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        self.inner.rollback_transaction()
    }

    fn insert_pub(&mut self, pub_: &Pub) -> Result<(), StoreError> {
        if let Some(e) = self.insert_fault() {
            return Err(e);
        }
        self.inner.insert_pub(pub_)
    }

    fn insert_data_schema(&mut self, pub_: &Pub) -> Result<usize, StoreError> {
        if let Some(e) = self.insert_fault() {
            return Err(e);
        }
        self.inner.insert_data_schema(pub_)
    }

    fn insert_value_snapshot(
        &mut self,
        pub_: &Pub,
        snap: &ValueSnapshot,
    ) -> Result<(), StoreError> {
        if let Some(e) = self.insert_fault() {
            return Err(e);
        }
        self.inner.insert_value_snapshot(pub_, snap)
    }
}

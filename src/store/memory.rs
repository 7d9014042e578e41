//! In-memory store for unit tests and deterministic simulation

use super::{PubRow, Row, Staging, Store, StoreError, ValueRow};
use crate::pubs::{Pub, ValueSnapshot};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    staging: Staging,
    committed: Vec<Row>,
    commits: u64,
    rollbacks: u64,
}

/// Cloning shares the underlying tables, so a test can keep a handle after
/// moving the store into the daemon.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.lock().commits
    }

    pub fn rollback_count(&self) -> u64 {
        self.inner.lock().rollbacks
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.lock().staging.is_open()
    }

    /// Every committed row in commit order.
    pub fn rows(&self) -> Vec<Row> {
        self.inner.lock().committed.clone()
    }

    pub fn pub_rows(&self) -> Vec<PubRow> {
        self.inner
            .lock()
            .committed
            .iter()
            .filter_map(|r| match r {
                Row::Pub(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn data_row_count(&self) -> usize {
        self.inner
            .lock()
            .committed
            .iter()
            .filter(|r| matches!(r, Row::Data(_)))
            .count()
    }

    pub fn value_rows(&self) -> Vec<ValueRow> {
        self.inner
            .lock()
            .committed
            .iter()
            .filter_map(|r| match r {
                Row::Value(v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn value_rows_for(&self, pub_guid: u64) -> Vec<ValueRow> {
        self.value_rows()
            .into_iter()
            .filter(|v| v.pub_guid == pub_guid)
            .collect()
    }
}

impl Store for InMemoryStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.inner.lock().staging.begin()
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.staging.pending()?;
        let rows = inner.staging.finish_commit();
        inner.committed.extend(rows);
        inner.commits += 1;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.staging.rollback();
        inner.rollbacks += 1;
        Ok(())
    }

    fn insert_pub(&mut self, pub_: &Pub) -> Result<(), StoreError> {
        self.inner
            .lock()
            .staging
            .push(Row::Pub(PubRow::from_pub(pub_)))
    }

    fn insert_data_schema(&mut self, pub_: &Pub) -> Result<usize, StoreError> {
        self.inner.lock().staging.push_schema(pub_)
    }

    fn insert_value_snapshot(
        &mut self,
        pub_: &Pub,
        snap: &ValueSnapshot,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .staging
            .push(Row::Value(ValueRow::from_snapshot(pub_.guid, snap)))
    }
}

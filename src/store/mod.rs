//! Persistence adapter
//!
//! The db-sync stage talks to storage only through [`Store`]. Rows are
//! staged inside a transaction and become visible on commit; a rollback
//! discards everything staged since `begin_transaction`.
//!
//! ## Implementations
//!
//! - `InMemoryStore`: row and commit counters for tests and DST
//! - `LocalFileStore`: CRC-checked JSON lines, fsync on commit
//! - `SimulatedStore`: wraps another store with seeded fault injection

pub mod local;
pub mod memory;
pub mod simulated;

pub use local::LocalFileStore;
pub use memory::InMemoryStore;
pub use simulated::{
    SimulatedStore, SimulatedStoreConfig, SimulatedStoreStats, SimulatedStoreStatsHandle,
};

use crate::pubs::{
    DataElement, Layer, Nature, Priority, Pub, Retain, Scope, ValClass, ValSemantic, ValType,
    ValueSnapshot,
};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::io::{Error as IoError, ErrorKind};

#[derive(Debug)]
pub enum StoreError {
    Io(IoError),
    DiskFull,
    /// A persisted row failed its checksum or could not be parsed
    Corruption(String),
    /// Insert or commit outside `begin_transaction`
    NoTransaction,
    /// `begin_transaction` while one is already open
    TransactionOpen,
    CommitFailed(String),
    Encode(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {}", e),
            StoreError::DiskFull => write!(f, "store disk full"),
            StoreError::Corruption(msg) => write!(f, "store corruption: {}", msg),
            StoreError::NoTransaction => write!(f, "no open transaction"),
            StoreError::TransactionOpen => write!(f, "transaction already open"),
            StoreError::CommitFailed(msg) => write!(f, "commit failed: {}", msg),
            StoreError::Encode(msg) => write!(f, "row encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        if e.kind() == ErrorKind::WriteZero || e.to_string().contains("No space left") {
            StoreError::DiskFull
        } else {
            StoreError::Io(e)
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encode(e.to_string())
    }
}

/// Storage boundary consumed by db-sync.
///
/// Calls are blocking. Retrying is safe at the transaction level only: a
/// failed transaction must be rolled back and may then be replayed whole.
pub trait Store: Send + 'static {
    fn begin_transaction(&mut self) -> Result<(), StoreError>;
    fn commit_transaction(&mut self) -> Result<(), StoreError>;
    fn rollback_transaction(&mut self) -> Result<(), StoreError>;

    /// Stage the pub's identity row.
    fn insert_pub(&mut self, pub_: &Pub) -> Result<(), StoreError>;

    /// Stage one schema row per element not yet persisted. Returns the
    /// number of rows staged.
    fn insert_data_schema(&mut self, pub_: &Pub) -> Result<usize, StoreError>;

    fn insert_value_snapshot(&mut self, pub_: &Pub, snap: &ValueSnapshot)
        -> Result<(), StoreError>;
}

impl<S: Store + ?Sized> Store for Box<S> {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        (**self).commit_transaction()
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        (**self).rollback_transaction()
    }

    fn insert_pub(&mut self, pub_: &Pub) -> Result<(), StoreError> {
        (**self).insert_pub(pub_)
    }

    fn insert_data_schema(&mut self, pub_: &Pub) -> Result<usize, StoreError> {
        (**self).insert_data_schema(pub_)
    }

    fn insert_value_snapshot(
        &mut self,
        pub_: &Pub,
        snap: &ValueSnapshot,
    ) -> Result<(), StoreError> {
        (**self).insert_value_snapshot(pub_, snap)
    }
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubRow {
    pub guid: u64,
    pub title: String,
    pub node_id: String,
    pub process_id: i32,
    pub thread_id: i32,
    pub comm_rank: i32,
    pub prog_name: String,
    pub prog_ver: String,
    pub channel: i32,
    pub layer: Layer,
    pub nature: Nature,
    pub pri_hint: Priority,
    pub scope_hint: Scope,
    pub retain_hint: Retain,
}

impl PubRow {
    pub fn from_pub(p: &Pub) -> Self {
        PubRow {
            guid: p.guid,
            title: p.title.clone(),
            node_id: p.node_id.clone(),
            process_id: p.process_id,
            thread_id: p.thread_id,
            comm_rank: p.comm_rank,
            prog_name: p.prog_name.clone(),
            prog_ver: p.prog_ver.clone(),
            channel: p.meta.channel,
            layer: p.meta.layer,
            nature: p.meta.nature,
            pri_hint: p.meta.pri_hint,
            scope_hint: p.meta.scope_hint,
            retain_hint: p.meta.retain_hint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub pub_guid: u64,
    pub guid: u64,
    pub name: String,
    pub val_type: ValType,
    pub semantic: ValSemantic,
    pub classification: ValClass,
}

impl DataRow {
    pub fn from_element(pub_guid: u64, elem: &DataElement) -> Self {
        DataRow {
            pub_guid,
            guid: elem.guid,
            name: elem.name.clone(),
            val_type: elem.val_type,
            semantic: elem.meta.semantic,
            classification: elem.meta.classification,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRow {
    pub pub_guid: u64,
    pub guid: u64,
    pub elem_index: i32,
    pub frame: i64,
    pub val_type: ValType,
    pub val: String,
    pub time_pack: f64,
    pub time_send: f64,
    pub time_recv: f64,
}

impl ValueRow {
    pub fn from_snapshot(pub_guid: u64, snap: &ValueSnapshot) -> Self {
        ValueRow {
            pub_guid,
            guid: snap.guid,
            elem_index: snap.elem_index,
            frame: snap.frame,
            val_type: snap.value.val_type(),
            val: snap.value.to_string(),
            time_pack: snap.time.pack,
            time_send: snap.time.send,
            time_recv: snap.time.recv,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum Row {
    Pub(PubRow),
    Data(DataRow),
    Value(ValueRow),
}

// ============================================================================
// Transaction staging shared by the concrete stores
// ============================================================================

/// Rows staged since `begin_transaction`, plus the element GUIDs whose
/// schema has been committed.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    open: bool,
    rows: Vec<Row>,
    staged_schema: Vec<u64>,
    persisted_schema: AHashSet<u64>,
}

impl Staging {
    pub(crate) fn with_persisted(guids: impl IntoIterator<Item = u64>) -> Self {
        Staging {
            persisted_schema: guids.into_iter().collect(),
            ..Staging::default()
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn begin(&mut self) -> Result<(), StoreError> {
        if self.open {
            return Err(StoreError::TransactionOpen);
        }
        debug_assert!(self.rows.is_empty() && self.staged_schema.is_empty());
        self.open = true;
        Ok(())
    }

    pub(crate) fn push(&mut self, row: Row) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::NoTransaction);
        }
        self.rows.push(row);
        Ok(())
    }

    pub(crate) fn push_schema(&mut self, pub_: &Pub) -> Result<usize, StoreError> {
        if !self.open {
            return Err(StoreError::NoTransaction);
        }
        let mut staged = 0;
        for elem in pub_.data() {
            if self.persisted_schema.contains(&elem.guid) || self.staged_schema.contains(&elem.guid)
            {
                continue;
            }
            self.rows.push(Row::Data(DataRow::from_element(pub_.guid, elem)));
            self.staged_schema.push(elem.guid);
            staged += 1;
        }
        Ok(staged)
    }

    /// Rows to make durable. The schema GUIDs only count as persisted once
    /// [`Staging::finish_commit`] runs.
    pub(crate) fn pending(&self) -> Result<&[Row], StoreError> {
        if !self.open {
            return Err(StoreError::NoTransaction);
        }
        Ok(&self.rows)
    }

    pub(crate) fn finish_commit(&mut self) -> Vec<Row> {
        self.persisted_schema.extend(self.staged_schema.drain(..));
        self.open = false;
        std::mem::take(&mut self.rows)
    }

    /// Drop everything staged. Returns the number of rows discarded.
    pub(crate) fn rollback(&mut self) -> usize {
        let dropped = self.rows.len();
        self.rows.clear();
        self.staged_schema.clear();
        self.open = false;
        dropped
    }
}

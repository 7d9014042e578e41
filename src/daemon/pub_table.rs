//! The daemon's table of every pub it has seen, keyed by pub GUID
//!
//! The table lock is taken only to look up or insert an entry. Each entry
//! has its own mutex, held by local-sync while applying a message and by
//! db-sync while staging rows.

use crate::pubs::{Pub, SnapQueue};
use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

#[derive(Debug)]
pub struct PubEntry {
    pub pub_: Pub,
    /// Values waiting for db-sync
    pub snaps: SnapQueue,
    /// Incremented once per applied PUBLISH
    pub frame: i64,
    /// The identity row has been committed
    pub persisted: bool,
    /// Element GUIDs whose schema row has been committed
    pub schema_guids: AHashSet<u64>,
}

impl PubEntry {
    fn new(guid: u64) -> Self {
        let mut pub_ = Pub::new(guid.to_string());
        pub_.guid = guid;
        PubEntry {
            pub_,
            snaps: SnapQueue::new(),
            frame: 0,
            persisted: false,
            schema_guids: AHashSet::new(),
        }
    }

    /// Identity or schema rows still need writing. A re-announce can
    /// replace a slot's GUID without changing the element count.
    pub fn needs_schema(&self) -> bool {
        !self.persisted
            || self
                .pub_
                .data()
                .iter()
                .any(|d| !self.schema_guids.contains(&d.guid))
    }

    pub(crate) fn mark_schema_persisted(&mut self, pub_: &Pub) {
        self.persisted = true;
        self.schema_guids.extend(pub_.data().iter().map(|d| d.guid));
    }
}

pub type PubRef = Arc<Mutex<PubEntry>>;

#[derive(Debug, Default)]
pub struct PubTable {
    pubs: RwLock<AHashMap<u64, PubRef>>,
}

impl PubTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guid: u64) -> Option<PubRef> {
        self.pubs.read().get(&guid).cloned()
    }

    /// Returns the entry and whether it was created by this call.
    pub fn get_or_create(&self, guid: u64) -> (PubRef, bool) {
        if let Some(entry) = self.get(guid) {
            return (entry, false);
        }
        let mut pubs = self.pubs.write();
        if let Some(entry) = pubs.get(&guid) {
            return (entry.clone(), false);
        }
        let entry = Arc::new(Mutex::new(PubEntry::new(guid)));
        pubs.insert(guid, entry.clone());
        (entry, true)
    }

    pub fn remove(&self, guid: u64) -> Option<PubRef> {
        self.pubs.write().remove(&guid)
    }

    pub fn len(&self) -> usize {
        self.pubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn guids(&self) -> Vec<u64> {
        let mut guids: Vec<u64> = self.pubs.read().keys().copied().collect();
        guids.sort_unstable();
        guids
    }

    /// Copy of the pub's current state.
    pub fn snapshot(&self, guid: u64) -> Option<Pub> {
        self.get(guid).map(|e| e.lock().pub_.clone())
    }
}

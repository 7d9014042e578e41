//! Point-in-time copies of element values awaiting persistence

use super::data::TimeStamps;
use super::publication::Pub;
use super::value::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct ValueSnapshot {
    pub elem_index: i32,
    pub guid: u64,
    pub frame: i64,
    pub time: TimeStamps,
    pub value: Value,
}

impl ValueSnapshot {
    /// Copy the current value of `slot`, or `None` while the slot is empty.
    pub fn capture(pub_: &Pub, slot: usize, frame: i64) -> Option<Self> {
        let elem = pub_.element(slot)?;
        let value = elem.value()?.clone();
        Some(ValueSnapshot {
            elem_index: slot as i32,
            guid: elem.guid,
            frame,
            time: elem.time,
            value,
        })
    }
}

/// FIFO of snapshots for one pub
#[derive(Debug, Default)]
pub struct SnapQueue {
    items: VecDeque<ValueSnapshot>,
}

impl SnapQueue {
    pub fn new() -> Self {
        SnapQueue {
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, snap: ValueSnapshot) {
        self.items.push_back(snap);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Take every queued snapshot, oldest first.
    pub fn drain(&mut self) -> Vec<ValueSnapshot> {
        self.items.drain(..).collect()
    }
}

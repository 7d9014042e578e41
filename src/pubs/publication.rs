//! Pub: a publisher's named metric schema plus current values
//!
//! Slots are append-only. A name keeps its slot index (and GUID) for the
//! life of the pub because PUBLISH refers to elements by index. Capacity
//! grows in fixed chunks and never shrinks.

use super::data::DataElement;
use super::meta::{Layer, Nature, Priority, Retain, Scope, ValState, ValType};
use super::value::Value;
use super::wall_time;
use crate::guid::{GuidError, GuidSource};
use ahash::AHashMap;

pub const DEFAULT_ELEM_CHUNK: usize = 32;

/// Error type for pub mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubError {
    /// No id available for a new element
    Guid(GuidError),
    /// The name already holds a value of another type
    TypeMismatch {
        name: String,
        declared: ValType,
        given: ValType,
    },
    EmptyName,
}

impl std::fmt::Display for PubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PubError::Guid(e) => write!(f, "{}", e),
            PubError::TypeMismatch {
                name,
                declared,
                given,
            } => write!(
                f,
                "element '{}' is declared {} but was packed as {}",
                name, declared, given
            ),
            PubError::EmptyName => write!(f, "element name must not be empty"),
        }
    }
}

impl std::error::Error for PubError {}

impl From<GuidError> for PubError {
    fn from(e: GuidError) -> Self {
        PubError::Guid(e)
    }
}

/// Channel and hint fields sent with every ANNOUNCE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubMeta {
    pub channel: i32,
    pub layer: Layer,
    pub nature: Nature,
    pub pri_hint: Priority,
    pub scope_hint: Scope,
    pub retain_hint: Retain,
}

impl Default for PubMeta {
    fn default() -> Self {
        PubMeta {
            channel: 0,
            layer: Layer::App,
            nature: Nature::Sos,
            pri_hint: Priority::Default,
            scope_hint: Scope::Default,
            retain_hint: Retain::Default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pub {
    pub guid: u64,
    pub title: String,
    pub node_id: String,
    pub process_id: i32,
    pub thread_id: i32,
    pub comm_rank: i32,
    pub prog_name: String,
    pub prog_ver: String,
    pub pragma: Vec<u8>,
    pub meta: PubMeta,
    announced: bool,
    elem_max: usize,
    chunk: usize,
    data: Vec<DataElement>,
    index: AHashMap<String, usize>,
}

impl Pub {
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_chunk(title, DEFAULT_ELEM_CHUNK)
    }

    pub fn with_chunk(title: impl Into<String>, chunk: usize) -> Self {
        let chunk = chunk.max(1);
        Pub {
            guid: 0,
            title: title.into(),
            node_id: String::new(),
            process_id: 0,
            thread_id: 0,
            comm_rank: 0,
            prog_name: String::new(),
            prog_ver: String::new(),
            pragma: Vec::new(),
            meta: PubMeta::default(),
            announced: false,
            elem_max: chunk,
            chunk,
            data: Vec::with_capacity(chunk),
            index: AHashMap::with_capacity(chunk),
        }
    }

    pub fn elem_count(&self) -> usize {
        self.data.len()
    }

    pub fn elem_max(&self) -> usize {
        self.elem_max
    }

    pub fn is_announced(&self) -> bool {
        self.announced
    }

    pub fn mark_announced(&mut self) {
        self.announced = true;
    }

    pub fn data(&self) -> &[DataElement] {
        &self.data
    }

    pub fn element(&self, slot: usize) -> Option<&DataElement> {
        self.data.get(slot)
    }

    pub(crate) fn element_mut(&mut self, slot: usize) -> Option<&mut DataElement> {
        self.data.get_mut(slot)
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.slot_of(name)
            .and_then(|slot| self.data[slot].value())
    }

    pub fn dirty_count(&self) -> usize {
        self.data.iter().filter(|d| d.is_dirty()).count()
    }

    /// Insert or update `name`, stamping the pack time with the wall clock.
    pub fn pack(
        &mut self,
        ids: &dyn GuidSource,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<usize, PubError> {
        self.pack_at(ids, name, value.into(), wall_time())
    }

    /// Insert or update `name` with an explicit pack time. Returns the slot.
    ///
    /// An update with a byte-identical value only refreshes the pack time;
    /// the element's state is left alone so nothing is re-sent.
    pub fn pack_at(
        &mut self,
        ids: &dyn GuidSource,
        name: &str,
        value: Value,
        now: f64,
    ) -> Result<usize, PubError> {
        if name.is_empty() {
            return Err(PubError::EmptyName);
        }

        if let Some(slot) = self.slot_of(name) {
            let elem = &mut self.data[slot];
            if elem.val_type != value.val_type() {
                return Err(PubError::TypeMismatch {
                    name: name.to_string(),
                    declared: elem.val_type,
                    given: value.val_type(),
                });
            }
            elem.time.pack = now;
            let unchanged = elem.state != ValState::Empty
                && elem.value().is_some_and(|v| v.same_encoding(&value));
            if !unchanged {
                elem.set_value(value, ValState::Dirty);
            }
            return Ok(slot);
        }

        let guid = ids.next_guid()?;
        if self.data.len() == self.elem_max {
            self.grow();
        }
        let slot = self.data.len();
        let mut elem = DataElement::empty(guid, name, value.val_type());
        elem.time.pack = now;
        elem.set_value(value, ValState::Dirty);
        self.data.push(elem);
        self.index.insert(name.to_string(), slot);
        self.announced = false;

        debug_assert!(self.data.len() <= self.elem_max);
        Ok(slot)
    }

    /// Add one chunk of capacity. Existing slots are untouched.
    fn grow(&mut self) {
        self.elem_max += self.chunk;
        self.data.reserve(self.elem_max - self.data.len());
    }

    /// Grow in whole chunks until at least `count` slots fit.
    pub(crate) fn ensure_capacity(&mut self, count: usize) {
        while self.elem_max < count {
            self.grow();
        }
    }

    /// Install the schema for `slot` as received in an ANNOUNCE.
    ///
    /// A slot already holding the same GUID keeps its value and state; a slot
    /// with a different GUID is replaced; a slot past the end is appended.
    pub(crate) fn apply_schema(&mut self, slot: usize, guid: u64, name: &str, val_type: ValType) {
        debug_assert!(slot <= self.data.len());
        debug_assert!(slot < self.elem_max);

        if slot == self.data.len() {
            self.data.push(DataElement::empty(guid, name, val_type));
            self.index.insert(name.to_string(), slot);
            return;
        }

        let elem = &mut self.data[slot];
        if elem.guid == guid && elem.val_type == val_type {
            if elem.name != name {
                let old = std::mem::replace(&mut elem.name, name.to_string());
                self.index.remove(&old);
                self.index.insert(name.to_string(), slot);
            }
            return;
        }

        let old = elem.name.clone();
        elem.reset_schema(guid, name, val_type);
        if self.index.get(&old) == Some(&slot) {
            self.index.remove(&old);
        }
        self.index.insert(name.to_string(), slot);
    }

    /// Mark `slot` as transmitted at `send_time`.
    pub(crate) fn mark_sent(&mut self, slot: usize, send_time: f64) {
        if let Some(elem) = self.data.get_mut(slot) {
            elem.time.send = send_time;
            if elem.state == ValState::Dirty {
                elem.state = ValState::Clean;
            }
        }
    }
}

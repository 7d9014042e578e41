//! Data elements: one named, typed slot inside a pub

use super::meta::{ValClass, ValCompare, ValFreq, ValPattern, ValSemantic, ValState, ValType};
use super::value::Value;

/// Seconds since the epoch at each hop
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeStamps {
    pub pack: f64,
    pub send: f64,
    pub recv: f64,
}

/// Descriptive hints; persisted with the schema, not sent in ANNOUNCE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMeta {
    pub semantic: ValSemantic,
    pub freq: ValFreq,
    pub classification: ValClass,
    pub pattern: ValPattern,
    pub compare: ValCompare,
}

impl Default for DataMeta {
    fn default() -> Self {
        DataMeta {
            semantic: ValSemantic::Default,
            freq: ValFreq::Default,
            classification: ValClass::Data,
            pattern: ValPattern::Default,
            compare: ValCompare::SelfValue,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    pub guid: u64,
    pub name: String,
    pub val_type: ValType,
    pub state: ValState,
    pub time: TimeStamps,
    pub meta: DataMeta,
    value: Option<Value>,
}

impl DataElement {
    /// A slot with a schema but no value yet.
    pub fn empty(guid: u64, name: impl Into<String>, val_type: ValType) -> Self {
        DataElement {
            guid,
            name: name.into(),
            val_type,
            state: ValState::Empty,
            time: TimeStamps::default(),
            meta: DataMeta::default(),
            value: None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Encoded length of the current value, 0 while empty.
    pub fn val_len(&self) -> usize {
        self.value.as_ref().map_or(0, Value::encoded_len)
    }

    pub fn is_dirty(&self) -> bool {
        self.state == ValState::Dirty
    }

    pub(crate) fn set_value(&mut self, value: Value, state: ValState) {
        debug_assert_eq!(value.val_type(), self.val_type);
        self.value = Some(value);
        self.state = state;
    }

    pub(crate) fn reset_schema(&mut self, guid: u64, name: &str, val_type: ValType) {
        *self = DataElement::empty(guid, name, val_type);
    }
}

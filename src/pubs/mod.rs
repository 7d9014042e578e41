//! Pub schema model: pubs, data elements, values and snapshots

pub mod data;
pub mod meta;
pub mod publication;
pub mod snapshot;
pub mod value;

pub use data::{DataElement, DataMeta, TimeStamps};
pub use meta::{
    Layer, Nature, Priority, Retain, Role, Scope, Status, ValClass, ValCompare, ValFreq,
    ValPattern, ValSemantic, ValState, ValType,
};
pub use publication::{Pub, PubError, PubMeta, DEFAULT_ELEM_CHUNK};
pub use snapshot::{SnapQueue, ValueSnapshot};
pub use value::Value;

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

//! Message Protocol
//!
//! Serialization of the message kinds exchanged between clients and
//! daemons, built on the field codec in [`crate::wire`]:
//!
//! - `announce`: full pub schema (identity, meta, element names and types)
//! - `publish`: values of dirty elements only, referenced by slot index
//! - `val_snaps`: batches of historical value snapshots
//! - `control`: REGISTER / GUID_BLOCK / ECHO / SHUTDOWN / CHECK_IN requests
//!   and their raw replies
//! - `frame`: reading one complete message off a byte stream

pub mod announce;
pub mod control;
pub mod frame;
pub mod publish;
pub mod val_snaps;

pub use announce::{announce_from_buffer, announce_to_buffer};
pub use control::{RegisterReply, ACK, SHUTDOWN_REPLY, UNKNOWN_REPLY};
pub use frame::{read_frame, FrameError};
pub use publish::{publish_from_buffer, publish_to_buffer, publish_to_buffer_at, PublishBuffer};
pub use val_snaps::{val_snaps_from_buffer, val_snaps_to_buffer};

use crate::pubs::ValType;
use crate::wire::{MsgHeader, MsgType, WireError, WireReader};

/// Error type for malformed or inapplicable messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Wire(WireError),
    UnexpectedType { expected: MsgType, got: MsgType },
    UnknownType(i32),
    /// `msg_size` disagrees with the bytes actually present
    SizeMismatch { declared: usize, actual: usize },
    /// PUBLISH or VAL_SNAPS names a slot the receiver has not been announced
    SlotOutOfRange { slot: i32, elem_count: usize },
    /// Data for a pub the receiver has never seen announced
    UnknownPub(u64),
    /// Value encoded with a type other than the element's declared type
    TypeMismatch { slot: usize, declared: ValType, got: ValType },
    UnknownTag { field: &'static str, tag: i32 },
    NegativeCount(i32),
    MalformedReply(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Wire(e) => write!(f, "{}", e),
            ProtocolError::UnexpectedType { expected, got } => {
                write!(f, "expected {} message, got {}", expected, got)
            }
            ProtocolError::UnknownType(tag) => write!(f, "unknown message type {}", tag),
            ProtocolError::SizeMismatch { declared, actual } => write!(
                f,
                "header declares {} bytes but message has {}",
                declared, actual
            ),
            ProtocolError::SlotOutOfRange { slot, elem_count } => write!(
                f,
                "slot {} out of range for pub with {} elements",
                slot, elem_count
            ),
            ProtocolError::UnknownPub(guid) => write!(f, "pub {} has not been announced", guid),
            ProtocolError::TypeMismatch {
                slot,
                declared,
                got,
            } => write!(
                f,
                "slot {} declared {} but carries {}",
                slot, declared, got
            ),
            ProtocolError::UnknownTag { field, tag } => {
                write!(f, "unknown {} tag {}", field, tag)
            }
            ProtocolError::NegativeCount(n) => write!(f, "negative element count {}", n),
            ProtocolError::MalformedReply(msg) => write!(f, "malformed reply: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<WireError> for ProtocolError {
    fn from(e: WireError) -> Self {
        ProtocolError::Wire(e)
    }
}

/// Decode and validate the header of a complete message of kind `expected`.
/// Returns the header and a reader positioned at the payload.
pub(crate) fn open_message(
    buf: &[u8],
    expected: MsgType,
) -> Result<(MsgHeader, WireReader<'_>), ProtocolError> {
    let mut r = WireReader::new(buf);
    let header = MsgHeader::decode(&mut r)?;
    if header.msg_type != expected {
        return Err(ProtocolError::UnexpectedType {
            expected,
            got: header.msg_type,
        });
    }
    let declared = header.frame_len()?;
    if declared != buf.len() {
        return Err(ProtocolError::SizeMismatch {
            declared,
            actual: buf.len(),
        });
    }
    Ok((header, r))
}

/// Read a non-negative count, bounded by the bytes left for its records.
pub(crate) fn read_count(r: &mut WireReader<'_>, min_record: usize) -> Result<usize, ProtocolError> {
    let count = r.get_i32()?;
    bounded_count(count, r, min_record)
}

/// Validate an already-read count against the bytes left for its records.
pub(crate) fn bounded_count(
    count: i32,
    r: &WireReader<'_>,
    min_record: usize,
) -> Result<usize, ProtocolError> {
    if count < 0 {
        return Err(ProtocolError::NegativeCount(count));
    }
    let count = count as usize;
    let needed = count.saturating_mul(min_record);
    if needed > r.remaining() {
        return Err(WireError::TruncatedMessage {
            needed,
            available: r.remaining(),
        }
        .into());
    }
    Ok(count)
}

pub(crate) fn read_tag<T>(
    r: &mut WireReader<'_>,
    field: &'static str,
    from_i32: fn(i32) -> Option<T>,
) -> Result<T, ProtocolError> {
    let tag = r.get_i32()?;
    from_i32(tag).ok_or(ProtocolError::UnknownTag { field, tag })
}

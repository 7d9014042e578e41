//! Wire format: field codec and message framing

pub mod codec;
pub mod header;

pub use codec::{
    pack, pack754, unpack, unpack754, Field, FieldKind, WireError, WireReader, WireWriter,
};
pub use header::{finish_message, header_only, start_message, MsgHeader, MsgType, HEADER_LEN};

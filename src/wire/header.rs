//! Message header and message-type tags

use super::codec::{WireError, WireReader, WireWriter, I32_LEN, I64_LEN};
use bytes::Bytes;

/// msg_size + msg_type + msg_from + pub_guid
pub const HEADER_LEN: usize = 2 * I32_LEN + 2 * I64_LEN;

/// Message kinds. Tags follow the deployed numbering so mixed builds agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Register,
    GuidBlock,
    Announce,
    Publish,
    ValSnaps,
    Echo,
    Shutdown,
    Ack,
    CheckIn,
    /// Any tag this build does not handle
    Unknown(i32),
}

impl MsgType {
    pub fn from_i32(tag: i32) -> Self {
        match tag {
            1 => MsgType::Register,
            3 => MsgType::GuidBlock,
            4 => MsgType::Announce,
            5 => MsgType::Publish,
            6 => MsgType::ValSnaps,
            7 => MsgType::Echo,
            9 => MsgType::Shutdown,
            10 => MsgType::Ack,
            11 => MsgType::CheckIn,
            other => MsgType::Unknown(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            MsgType::Register => 1,
            MsgType::GuidBlock => 3,
            MsgType::Announce => 4,
            MsgType::Publish => 5,
            MsgType::ValSnaps => 6,
            MsgType::Echo => 7,
            MsgType::Shutdown => 9,
            MsgType::Ack => 10,
            MsgType::CheckIn => 11,
            MsgType::Unknown(tag) => tag,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MsgType::Register => "REGISTER",
            MsgType::GuidBlock => "GUID_BLOCK",
            MsgType::Announce => "ANNOUNCE",
            MsgType::Publish => "PUBLISH",
            MsgType::ValSnaps => "VAL_SNAPS",
            MsgType::Echo => "ECHO",
            MsgType::Shutdown => "SHUTDOWN",
            MsgType::Ack => "ACK",
            MsgType::CheckIn => "CHECK_IN",
            MsgType::Unknown(_) => "UNKNOWN",
        }
    }

    /// Data-carrying kinds the daemon queues for the sync pipeline.
    pub fn is_queued(self) -> bool {
        matches!(
            self,
            MsgType::Announce | MsgType::Publish | MsgType::ValSnaps
        )
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgType::Unknown(tag) => write!(f, "UNKNOWN({})", tag),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Fixed header preceding every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// Total bytes including this header
    pub msg_size: i32,
    pub msg_type: MsgType,
    /// Sender GUID, 0 for an unregistered client
    pub msg_from: u64,
    /// Target pub GUID, 0 when not applicable
    pub pub_guid: u64,
}

impl MsgHeader {
    pub fn new(msg_type: MsgType, msg_from: u64, pub_guid: u64) -> Self {
        MsgHeader {
            msg_size: HEADER_LEN as i32,
            msg_type,
            msg_from,
            pub_guid,
        }
    }

    pub fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.msg_size);
        w.put_i32(self.msg_type.as_i32());
        w.put_u64(self.msg_from);
        w.put_u64(self.pub_guid);
    }

    pub fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(MsgHeader {
            msg_size: r.get_i32()?,
            msg_type: MsgType::from_i32(r.get_i32()?),
            msg_from: r.get_u64()?,
            pub_guid: r.get_u64()?,
        })
    }

    /// Decode the header at the start of `buf`.
    pub fn peek(buf: &[u8]) -> Result<Self, WireError> {
        Self::decode(&mut WireReader::new(buf))
    }

    /// Declared size as a byte count, rejecting sizes smaller than a header.
    pub fn frame_len(&self) -> Result<usize, WireError> {
        match usize::try_from(self.msg_size) {
            Ok(len) if len >= HEADER_LEN => Ok(len),
            _ => Err(WireError::InvalidLength(self.msg_size)),
        }
    }
}

/// Start a message: the header is written with a placeholder size that
/// [`finish_message`] fills in.
pub fn start_message(msg_type: MsgType, msg_from: u64, pub_guid: u64) -> WireWriter {
    let mut w = WireWriter::with_capacity(HEADER_LEN * 4);
    MsgHeader::new(msg_type, msg_from, pub_guid).encode(&mut w);
    w
}

/// Patch `msg_size` with the final length and freeze the buffer.
pub fn finish_message(mut w: WireWriter) -> Result<Bytes, WireError> {
    let size = i32::try_from(w.len()).map_err(|_| WireError::FieldTooLong {
        len: w.len(),
        max: i32::MAX as usize,
    })?;
    w.patch_i32(0, size)?;
    Ok(w.freeze())
}

/// A message with no payload.
pub fn header_only(msg_type: MsgType, msg_from: u64, pub_guid: u64) -> Bytes {
    let mut w = WireWriter::with_capacity(HEADER_LEN);
    MsgHeader::new(msg_type, msg_from, pub_guid).encode(&mut w);
    w.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len() {
        assert_eq!(HEADER_LEN, 24);
    }

    #[test]
    fn test_msg_type_tags_are_stable() {
        for t in [
            MsgType::Register,
            MsgType::GuidBlock,
            MsgType::Announce,
            MsgType::Publish,
            MsgType::ValSnaps,
            MsgType::Echo,
            MsgType::Shutdown,
            MsgType::Ack,
            MsgType::CheckIn,
        ] {
            assert_eq!(MsgType::from_i32(t.as_i32()), t);
        }
        assert_eq!(MsgType::from_i32(42), MsgType::Unknown(42));
        assert_eq!(MsgType::Unknown(42).as_i32(), 42);
    }

    #[test]
    fn test_finish_message_patches_size() {
        let mut w = start_message(MsgType::Echo, 5, 6);
        w.put_raw(b"payload");
        let bytes = finish_message(w).unwrap();

        let header = MsgHeader::peek(&bytes).unwrap();
        assert_eq!(header.msg_size as usize, bytes.len());
        assert_eq!(header.msg_type, MsgType::Echo);
        assert_eq!(header.msg_from, 5);
        assert_eq!(header.pub_guid, 6);
    }

    #[test]
    fn test_frame_len_rejects_undersized() {
        let mut header = MsgHeader::new(MsgType::Publish, 1, 2);
        header.msg_size = 10;
        assert_eq!(header.frame_len(), Err(WireError::InvalidLength(10)));
        header.msg_size = -1;
        assert!(header.frame_len().is_err());
    }

    #[test]
    fn test_peek_truncated_header() {
        let bytes = header_only(MsgType::Ack, 0, 0);
        assert!(MsgHeader::peek(&bytes[..HEADER_LEN - 1]).is_err());
    }
}

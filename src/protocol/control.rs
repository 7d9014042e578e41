//! Control messages and raw replies
//!
//! Replies are not framed: the daemon writes the reply bytes and closes
//! the connection.

use super::ProtocolError;
use crate::guid::GuidBlock;
use crate::wire::{finish_message, header_only, start_message, MsgType};
use bytes::{BufMut, Bytes, BytesMut};

pub const ACK: &[u8] = b"ACK\0";
pub const UNKNOWN_REPLY: &[u8] = b"SOS daemon did not understand your message!";
pub const SHUTDOWN_REPLY: &[u8] = b"I received your SHUTDOWN!";

/// Two uint64 values: first and last id of the leased block
pub const BLOCK_REPLY_LEN: usize = 16;

pub fn register_request(msg_from: u64) -> Bytes {
    header_only(MsgType::Register, msg_from, 0)
}

pub fn guid_block_request(msg_from: u64) -> Bytes {
    header_only(MsgType::GuidBlock, msg_from, 0)
}

pub fn check_in_request(msg_from: u64) -> Bytes {
    header_only(MsgType::CheckIn, msg_from, 0)
}

pub fn shutdown_request(msg_from: u64) -> Bytes {
    header_only(MsgType::Shutdown, msg_from, 0)
}

pub fn echo_request(msg_from: u64, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut w = start_message(MsgType::Echo, msg_from, 0);
    w.put_raw(payload);
    Ok(finish_message(w)?)
}

pub fn encode_block_reply(block: GuidBlock) -> Bytes {
    let mut buf = BytesMut::with_capacity(BLOCK_REPLY_LEN);
    buf.put_u64(block.from);
    buf.put_u64(block.to);
    buf.freeze()
}

pub fn decode_block_reply(reply: &[u8]) -> Result<GuidBlock, ProtocolError> {
    if reply.len() != BLOCK_REPLY_LEN {
        return Err(ProtocolError::MalformedReply(format!(
            "expected {} byte GUID block, got {} bytes",
            BLOCK_REPLY_LEN,
            reply.len()
        )));
    }
    let mut from = [0u8; 8];
    let mut to = [0u8; 8];
    from.copy_from_slice(&reply[..8]);
    to.copy_from_slice(&reply[8..]);
    let block = GuidBlock::new(u64::from_be_bytes(from), u64::from_be_bytes(to));
    if block.is_empty() {
        return Err(ProtocolError::MalformedReply(format!(
            "empty GUID block {}..{}",
            block.from, block.to
        )));
    }
    Ok(block)
}

pub fn is_ack(reply: &[u8]) -> bool {
    reply.starts_with(&ACK[..3])
}

/// Answer to REGISTER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterReply {
    /// New client: a fresh block of ids
    Block(GuidBlock),
    /// Returning client: acknowledged, no ids
    Ack,
}

impl RegisterReply {
    pub fn decode(reply: &[u8]) -> Result<Self, ProtocolError> {
        if is_ack(reply) {
            return Ok(RegisterReply::Ack);
        }
        decode_block_reply(reply).map(RegisterReply::Block)
    }
}

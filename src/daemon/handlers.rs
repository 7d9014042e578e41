//! Per-message dispatch on the network thread
//!
//! Data messages are queued for local-sync and acknowledged at once; the ACK
//! means "received", not "applied". Control messages are answered inline.

use super::context::{DaemonContext, DaemonStats};
use crate::error::SosError;
use crate::protocol::control::encode_block_reply;
use crate::protocol::{ProtocolError, ACK, SHUTDOWN_REPLY, UNKNOWN_REPLY};
use crate::pubs::Status;
use crate::wire::{MsgHeader, MsgType};
use bytes::Bytes;
use tracing::{debug, info, warn};

/// Raw reply to write back, or `None` to close without replying.
pub(crate) fn dispatch(ctx: &DaemonContext, header: &MsgHeader, frame: Bytes) -> Option<Bytes> {
    match header.msg_type {
        MsgType::Announce | MsgType::Publish | MsgType::ValSnaps => {
            if let Err(rejected) = ctx.local_pipe.push(frame) {
                warn!(
                    msg_type = %header.msg_type,
                    pub_guid = header.pub_guid,
                    error = %rejected,
                    "local-sync closed, dropping message"
                );
            } else {
                DaemonStats::bump(&ctx.stats.queued);
            }
            Some(Bytes::from_static(ACK))
        }
        MsgType::Register if header.msg_from != 0 => {
            debug!(msg_from = header.msg_from, "re-registration");
            Some(Bytes::from_static(ACK))
        }
        MsgType::Register | MsgType::GuidBlock => lease_block(ctx, header),
        MsgType::Echo => Some(frame),
        MsgType::CheckIn => Some(Bytes::from_static(ACK)),
        MsgType::Shutdown => {
            info!(msg_from = header.msg_from, "SHUTDOWN received");
            ctx.stop_running();
            ctx.set_status(Status::Shutdown);
            Some(Bytes::from_static(SHUTDOWN_REPLY))
        }
        MsgType::Ack | MsgType::Unknown(_) => {
            DaemonStats::bump(&ctx.stats.protocol_errors);
            warn!(
                msg_from = header.msg_from,
                error = %ProtocolError::UnknownType(header.msg_type.as_i32()),
                "unhandled message"
            );
            Some(Bytes::from_static(UNKNOWN_REPLY))
        }
    }
}

fn lease_block(ctx: &DaemonContext, header: &MsgHeader) -> Option<Bytes> {
    match ctx.guids.claim_block(ctx.config.guid_block_size) {
        Ok(block) => {
            debug!(
                msg_from = header.msg_from,
                from = block.from,
                to = block.to,
                "leased GUID block"
            );
            Some(encode_block_reply(block))
        }
        Err(e) => {
            ctx.fail(SosError::Guid(e));
            None
        }
    }
}

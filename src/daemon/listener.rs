//! Network thread: accept, read one message, reply, close
//!
//! Connections are served one at a time on this thread, which keeps the
//! order of messages from a client identical to the order they reach
//! local-sync.

use super::context::{DaemonContext, DaemonStats};
use super::handlers::dispatch;
use crate::protocol::{read_frame, FrameError};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on how long one peer may hold the network thread.
const PEER_IO_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn run_listener(ctx: Arc<DaemonContext>, listener: TcpListener) {
    info!(addr = %ctx.local_addr(), "daemon listening");
    for incoming in listener.incoming() {
        if !ctx.is_running() {
            break;
        }
        match incoming {
            Ok(stream) => {
                DaemonStats::bump(&ctx.stats.connections);
                serve_connection(&ctx, stream);
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
        if !ctx.is_running() {
            break;
        }
    }
    debug!("accept loop exited");
}

fn serve_connection(ctx: &DaemonContext, mut stream: TcpStream) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    if let Err(e) = stream
        .set_read_timeout(Some(PEER_IO_TIMEOUT))
        .and_then(|_| stream.set_write_timeout(Some(PEER_IO_TIMEOUT)))
    {
        warn!(peer = %peer, error = %e, "failed to set socket timeouts");
    }

    let mut buf = ctx.buffers.acquire();
    let frame = read_frame(&mut stream, &mut buf, ctx.config.max_message_size);
    ctx.buffers.release(buf);

    let (header, frame) = match frame {
        Ok(read) => read,
        Err(FrameError::PeerClosed { received: 0 }) => {
            debug!(peer = %peer, "connection closed without a message");
            return;
        }
        Err(e) => {
            DaemonStats::bump(&ctx.stats.protocol_errors);
            warn!(peer = %peer, error = %e, "dropping connection");
            return;
        }
    };

    debug!(
        peer = %peer,
        msg_type = %header.msg_type,
        msg_from = header.msg_from,
        pub_guid = header.pub_guid,
        size = frame.len(),
        "message received"
    );

    if let Some(reply) = dispatch(ctx, &header, frame) {
        if let Err(e) = stream.write_all(&reply).and_then(|_| stream.flush()) {
            warn!(peer = %peer, error = %e, "reply failed");
        }
    }
}

//! Forwarding to an upstream daemon over TCP, one connection per message

use super::{FlushOutcome, Transport, TransportError};
use bytes::Bytes;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, warn};

/// Connect, write `msg`, and read the reply until the peer closes.
///
/// `io_timeout` bounds each read and write; `None` blocks indefinitely.
pub fn round_trip(
    addr: &str,
    msg: &[u8],
    io_timeout: Option<Duration>,
) -> Result<Vec<u8>, TransportError> {
    let mut stream = connect(addr, io_timeout)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(io_timeout)?;
    stream.set_write_timeout(io_timeout)?;
    stream.write_all(msg)?;
    stream.flush()?;

    let mut reply = Vec::with_capacity(64);
    stream.read_to_end(&mut reply)?;
    if reply.is_empty() {
        return Err(TransportError::EmptyReply);
    }
    Ok(reply)
}

fn connect(addr: &str, timeout: Option<Duration>) -> Result<TcpStream, TransportError> {
    let connect_err = |source| TransportError::Connect {
        addr: addr.to_string(),
        source,
    };
    let Some(timeout) = timeout else {
        return TcpStream::connect(addr).map_err(connect_err);
    };
    let mut last = None;
    for sock in addr.to_socket_addrs().map_err(connect_err)? {
        match TcpStream::connect_timeout(&sock, timeout) {
            Ok(s) => return Ok(s),
            Err(e) => last = Some(e),
        }
    }
    Err(connect_err(last.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing")
    })))
}

/// Delivers each forwarded message to an upstream daemon's listener
pub struct TcpForwarder {
    target: String,
    io_timeout: Option<Duration>,
    pending: Vec<Bytes>,
    finalized: bool,
    delivered: u64,
}

impl TcpForwarder {
    pub fn new(target: impl Into<String>, io_timeout: Option<Duration>) -> Self {
        TcpForwarder {
            target: target.into(),
            io_timeout,
            pending: Vec::new(),
            finalized: false,
            delivered: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl Transport for TcpForwarder {
    fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        if self.finalized {
            return Err(TransportError::Finalized);
        }
        let reply = round_trip(&self.target, buf, self.io_timeout)?;
        self.delivered += 1;
        debug!(target = %self.target, bytes = buf.len(), reply = reply.len(), "forwarded");
        Ok(())
    }

    fn enqueue(&mut self, buf: Bytes) -> Result<(), TransportError> {
        if self.finalized {
            return Err(TransportError::Finalized);
        }
        self.pending.push(buf);
        Ok(())
    }

    fn flush(&mut self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();
        for buf in std::mem::take(&mut self.pending) {
            match round_trip(&self.target, &buf, self.io_timeout) {
                Ok(_) => {
                    self.delivered += 1;
                    outcome.delivered += 1;
                }
                Err(e) => {
                    warn!(target = %self.target, error = %e, "dropping forwarded message");
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }

    fn finalize(&mut self) -> Result<FlushOutcome, TransportError> {
        if self.finalized {
            return Err(TransportError::Finalized);
        }
        let outcome = self.flush();
        self.finalized = true;
        Ok(outcome)
    }
}

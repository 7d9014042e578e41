//! Reading one framed message from a stream

use crate::wire::{MsgHeader, WireError, HEADER_LEN};
use bytes::{Bytes, BytesMut};
use std::io::{ErrorKind, Read};

#[derive(Debug)]
pub enum FrameError {
    Io(std::io::Error),
    /// The peer closed the stream after `received` bytes
    PeerClosed { received: usize },
    Wire(WireError),
    TooLarge { size: usize, max: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "I/O error reading message: {}", e),
            FrameError::PeerClosed { received } => {
                write!(f, "peer closed connection after {} bytes", received)
            }
            FrameError::Wire(e) => write!(f, "bad message header: {}", e),
            FrameError::TooLarge { size, max } => {
                write!(f, "message of {} bytes exceeds limit {}", size, max)
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl From<WireError> for FrameError {
    fn from(e: WireError) -> Self {
        FrameError::Wire(e)
    }
}

/// Fill `buf[from..to]`, tolerating short reads.
fn fill<R: Read>(stream: &mut R, buf: &mut BytesMut, from: usize, to: usize) -> Result<(), FrameError> {
    buf.resize(to, 0);
    let mut got = from;
    while got < to {
        match stream.read(&mut buf[got..to]) {
            Ok(0) => return Err(FrameError::PeerClosed { received: got }),
            Ok(n) => got += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read the header, then keep reading until `msg_size` bytes have arrived.
/// The message is split off the front of `buf`, leaving its spare capacity
/// for reuse.
pub fn read_frame<R: Read>(
    stream: &mut R,
    buf: &mut BytesMut,
    max_size: usize,
) -> Result<(MsgHeader, Bytes), FrameError> {
    buf.clear();
    fill(stream, buf, 0, HEADER_LEN)?;
    let header = MsgHeader::peek(&buf[..])?;
    let size = header.frame_len()?;
    if size > max_size {
        return Err(FrameError::TooLarge {
            size,
            max: max_size,
        });
    }
    fill(stream, buf, HEADER_LEN, size)?;
    Ok((header, buf.split_to(size).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{finish_message, start_message, MsgType};
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn message(payload: &[u8]) -> Bytes {
        let mut w = start_message(MsgType::Echo, 1, 2);
        w.put_raw(payload);
        finish_message(w).unwrap()
    }

    #[test]
    fn test_partial_reads_are_reassembled() {
        let msg = message(&[7u8; 100]);
        let mut stream = Trickle {
            data: msg.to_vec(),
            pos: 0,
            step: 3,
        };
        let mut buf = BytesMut::new();
        let (header, frame) = read_frame(&mut stream, &mut buf, 1 << 20).unwrap();
        assert_eq!(header.msg_type, MsgType::Echo);
        assert_eq!(frame, msg);
    }

    #[test]
    fn test_peer_close_mid_message() {
        let msg = message(b"abcdef");
        let mut stream = Cursor::new(msg[..msg.len() - 2].to_vec());
        let mut buf = BytesMut::new();
        match read_frame(&mut stream, &mut buf, 1 << 20) {
            Err(FrameError::PeerClosed { received }) => assert_eq!(received, msg.len() - 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_immediate_close() {
        let mut stream = Cursor::new(Vec::new());
        let mut buf = BytesMut::new();
        assert!(matches!(
            read_frame(&mut stream, &mut buf, 1024),
            Err(FrameError::PeerClosed { received: 0 })
        ));
    }

    #[test]
    fn test_oversized_rejected() {
        let msg = message(&[0u8; 64]);
        let mut stream = Cursor::new(msg.to_vec());
        let mut buf = BytesMut::new();
        assert!(matches!(
            read_frame(&mut stream, &mut buf, 32),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_undersized_header_rejected() {
        let mut bytes = message(b"").to_vec();
        bytes[..4].copy_from_slice(&4i32.to_be_bytes());
        let mut stream = Cursor::new(bytes);
        let mut buf = BytesMut::new();
        assert!(matches!(
            read_frame(&mut stream, &mut buf, 1024),
            Err(FrameError::Wire(WireError::InvalidLength(4)))
        ));
    }
}

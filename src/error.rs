//! Crate-level error and its failure classification
//!
//! Each layer keeps its own error enum. `SosError` wraps them at the
//! boundaries where callers need to decide whether a failure is recoverable.

use crate::config::ConfigError;
use crate::guid::GuidError;
use crate::protocol::{FrameError, ProtocolError};
use crate::pubs::PubError;
use crate::queue::QueueError;
use crate::store::StoreError;
use crate::transport::TransportError;
use crate::wire::WireError;

/// How a failure should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input from a peer: drop the connection, keep serving
    Protocol,
    /// Id space used up: fatal on a daemon, refill on a client
    ResourceExhausted,
    /// Network failure: surfaced to the immediate caller
    Transport,
    /// Persistence failure: the batch is lost, the daemon continues
    Storage,
    /// A bug
    InvariantViolation,
}

#[derive(Debug)]
pub enum SosError {
    Protocol(ProtocolError),
    Frame(FrameError),
    Guid(GuidError),
    Pub(PubError),
    Queue(QueueError),
    Store(StoreError),
    Transport(TransportError),
    Config(ConfigError),
    Io(std::io::Error),
    Invariant(String),
}

impl SosError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SosError::Protocol(_) => ErrorKind::Protocol,
            SosError::Frame(FrameError::Io(_)) | SosError::Frame(FrameError::PeerClosed { .. }) => {
                ErrorKind::Transport
            }
            SosError::Frame(_) => ErrorKind::Protocol,
            SosError::Guid(GuidError::Exhausted { .. }) => ErrorKind::ResourceExhausted,
            SosError::Guid(GuidError::Refill(_)) => ErrorKind::Transport,
            SosError::Pub(PubError::Guid(GuidError::Exhausted { .. })) => {
                ErrorKind::ResourceExhausted
            }
            SosError::Pub(PubError::Guid(GuidError::Refill(_))) => ErrorKind::Transport,
            SosError::Pub(_) => ErrorKind::Protocol,
            SosError::Queue(QueueError::RingFull) => ErrorKind::ResourceExhausted,
            SosError::Queue(_) => ErrorKind::InvariantViolation,
            SosError::Store(_) => ErrorKind::Storage,
            SosError::Transport(_) | SosError::Io(_) => ErrorKind::Transport,
            SosError::Config(_) | SosError::Invariant(_) => ErrorKind::InvariantViolation,
        }
    }

    pub fn is_fatal_for_daemon(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ResourceExhausted | ErrorKind::InvariantViolation
        )
    }
}

impl std::fmt::Display for SosError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SosError::Protocol(e) => write!(f, "{}", e),
            SosError::Frame(e) => write!(f, "{}", e),
            SosError::Guid(e) => write!(f, "{}", e),
            SosError::Pub(e) => write!(f, "{}", e),
            SosError::Queue(e) => write!(f, "{}", e),
            SosError::Store(e) => write!(f, "{}", e),
            SosError::Transport(e) => write!(f, "{}", e),
            SosError::Config(e) => write!(f, "{}", e),
            SosError::Io(e) => write!(f, "I/O error: {}", e),
            SosError::Invariant(msg) => write!(f, "invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for SosError {}

macro_rules! from_layer {
    ($($source:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$source> for SosError {
                fn from(e: $source) -> Self {
                    SosError::$variant(e)
                }
            }
        )+
    };
}

from_layer! {
    ProtocolError => Protocol,
    FrameError => Frame,
    GuidError => Guid,
    PubError => Pub,
    QueueError => Queue,
    StoreError => Store,
    TransportError => Transport,
    ConfigError => Config,
    std::io::Error => Io,
}

impl From<WireError> for SosError {
    fn from(e: WireError) -> Self {
        SosError::Protocol(ProtocolError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, SosError>;

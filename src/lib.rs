pub mod wire;
pub mod pubs;
pub mod protocol;
pub mod guid;
pub mod queue;
pub mod store;
pub mod transport;
pub mod daemon;
pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod sim;
pub mod dst;

#[cfg(test)]
mod stateright_models;

pub use client::Client;
pub use config::{ClientConfig, DaemonConfig};
pub use daemon::{Daemon, DaemonHandle};
pub use error::SosError;
pub use pubs::{Pub, Value};

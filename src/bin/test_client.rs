//! Demo publisher
//!
//! Registers with a running daemon, publishes a few frames of a small pub,
//! and optionally asks the daemon to shut down.
//!
//! ```text
//! sos-test-client [FRAMES] [--shutdown]
//! ```
//!
//! The daemon address comes from `SOS_DAEMON_ADDR` (default 127.0.0.1:25500).

use sos_telemetry::client::Client;
use sos_telemetry::config::ClientConfig;
use sos_telemetry::error::SosError;
use sos_telemetry::observability::init_tracing;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

const DEFAULT_FRAMES: u32 = 10;

fn run(frames: u32, shutdown: bool) -> Result<(), SosError> {
    let config = ClientConfig::from_env();
    init_tracing(&config.log);

    let client = Client::connect(config)?;
    client.check_in()?;

    let mut demo = client.new_pub("sos-test-client")?;
    for frame in 0..frames {
        client.pack(&mut demo, "frame", i64::from(frame))?;
        client.pack(&mut demo, "elapsed", f64::from(frame) * 0.25)?;
        client.pack(&mut demo, "status", format!("frame {} of {}", frame + 1, frames))?;
        client.publish(&mut demo)?;
        std::thread::sleep(Duration::from_millis(100));
    }
    info!(pub_guid = demo.guid, frames, elems = demo.elem_count(), "published");

    let reply = client.echo(b"sos-test-client")?;
    info!(bytes = reply.len(), "echo reply received");

    if shutdown {
        client.shutdown_daemon()?;
        info!("daemon shutdown requested");
    }
    Ok(())
}

fn main() -> ExitCode {
    let mut frames = DEFAULT_FRAMES;
    let mut shutdown = false;
    for arg in std::env::args().skip(1) {
        if arg == "--shutdown" {
            shutdown = true;
        } else if let Ok(n) = arg.parse() {
            frames = n;
        } else {
            eprintln!("usage: sos-test-client [FRAMES] [--shutdown]");
            return ExitCode::FAILURE;
        }
    }

    match run(frames, shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "test client failed");
            eprintln!("sos-test-client: {}", e);
            ExitCode::FAILURE
        }
    }
}

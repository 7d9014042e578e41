//! SOS Telemetry Daemon
//!
//! Listens for client messages, mirrors announced pubs, persists values and
//! optionally forwards everything to an upstream daemon.
//!
//! ```text
//! sosd [CONFIG.toml]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | SOS_LISTEN_ADDR | 127.0.0.1:25500 | Listen address |
//! | SOS_ROLE | listener | listener or aggregator |
//! | SOS_COMM_RANK | 0 | This daemon's rank |
//! | SOS_COMM_SIZE | 1 | Number of daemon ranks |
//! | SOS_DB_PATH | - | File store path (in-memory when unset) |
//! | SOS_DB_SYNC_MS | 50 | db-sync batching interval |
//! | SOS_CLOUD_TARGET | - | Upstream daemon address |
//! | SOS_LOG_JSON | false | JSON log lines |
//! | RUST_LOG | info | Log filter |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use sos_telemetry::config::DaemonConfig;
use sos_telemetry::daemon::Daemon;
use sos_telemetry::error::SosError;
use sos_telemetry::observability::init_tracing;
use std::process::ExitCode;
use tracing::{error, info};

fn load_config() -> Result<DaemonConfig, SosError> {
    match std::env::args().nth(1) {
        Some(path) => {
            let mut config = DaemonConfig::from_toml_file(&path)?;
            config.apply_env();
            Ok(config)
        }
        None => Ok(DaemonConfig::from_env()),
    }
}

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("sosd: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        role = %config.role,
        "sosd starting"
    );

    match Daemon::run(config) {
        Ok(()) => {
            info!("sosd exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "sosd failed");
            ExitCode::FAILURE
        }
    }
}

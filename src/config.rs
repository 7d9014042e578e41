//! Daemon and client configuration
//!
//! Defaults suit a single local daemon. Every field can be overridden from a
//! TOML file, and the common ones from `SOS_*` environment variables.

use crate::guid::{DEFAULT_GUID_BLOCK, DEFAULT_UID_MAX};
use crate::pubs::Role;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:25500";
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// One JSON object per line instead of human-readable text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            default_filter: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        LogConfig {
            json: env_flag("SOS_LOG_JSON").unwrap_or(false),
            ..LogConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_addr: String,
    pub role: Role,
    pub comm_rank: u32,
    pub comm_size: u32,
    /// Upper end of the id space split across all daemon ranks
    pub uid_max: u64,
    /// Ids handed to a client per REGISTER or GUID_BLOCK (plus one)
    pub guid_block_size: u64,
    /// File store location; `None` keeps rows in memory
    pub db_path: Option<PathBuf>,
    /// How long db-sync waits to gather a batch
    #[serde(with = "duration_millis")]
    pub db_sync_interval: Duration,
    /// Most tasks persisted in one transaction
    pub db_batch_max: usize,
    /// Upstream daemon to forward to; `None` disables cloud-sync
    pub cloud_target: Option<String>,
    #[serde(with = "duration_millis")]
    pub cloud_timeout: Duration,
    pub max_message_size: usize,
    pub buffer_pool_size: usize,
    pub buffer_capacity: usize,
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            role: Role::Listener,
            comm_rank: 0,
            comm_size: 1,
            uid_max: DEFAULT_UID_MAX,
            guid_block_size: DEFAULT_GUID_BLOCK,
            db_path: None,
            db_sync_interval: Duration::from_millis(50),
            db_batch_max: 1024,
            cloud_target: None,
            cloud_timeout: Duration::from_secs(5),
            max_message_size: DEFAULT_MAX_MESSAGE,
            buffer_pool_size: 64,
            buffer_capacity: 4096,
            log: LogConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Ephemeral port, in-memory store, short batching interval
    pub fn test() -> Self {
        DaemonConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            db_sync_interval: Duration::from_millis(5),
            guid_block_size: 10,
            uid_max: 1_000_000,
            cloud_timeout: Duration::from_secs(2),
            buffer_pool_size: 4,
            ..Default::default()
        }
    }

    /// Defaults overlaid with `SOS_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = DaemonConfig::default();
        config.apply_env();
        config
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("SOS_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(role) = std::env::var("SOS_ROLE").ok().and_then(|r| parse_role(&r)) {
            self.role = role;
        }
        if let Some(rank) = env_parse("SOS_COMM_RANK") {
            self.comm_rank = rank;
        }
        if let Some(size) = env_parse("SOS_COMM_SIZE") {
            self.comm_size = size;
        }
        if let Ok(path) = std::env::var("SOS_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_parse("SOS_DB_SYNC_MS") {
            self.db_sync_interval = Duration::from_millis(ms);
        }
        if let Ok(target) = std::env::var("SOS_CLOUD_TARGET") {
            self.cloud_target = Some(target).filter(|t| !t.is_empty());
        }
        if let Some(json) = env_flag("SOS_LOG_JSON") {
            self.log.json = json;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.comm_size == 0 {
            return Err(ConfigError::Invalid("comm_size must be at least 1".into()));
        }
        if self.comm_rank >= self.comm_size {
            return Err(ConfigError::Invalid(format!(
                "comm_rank {} outside comm_size {}",
                self.comm_rank, self.comm_size
            )));
        }
        if self.uid_max / u64::from(self.comm_size) == 0 {
            return Err(ConfigError::Invalid(format!(
                "uid_max {} too small for {} ranks",
                self.uid_max, self.comm_size
            )));
        }
        if self.guid_block_size == 0 {
            return Err(ConfigError::Invalid("guid_block_size must be positive".into()));
        }
        if self.max_message_size < crate::wire::HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "max_message_size {} smaller than a header",
                self.max_message_size
            )));
        }
        if !self.role.is_daemon() {
            return Err(ConfigError::Invalid(format!(
                "role {} cannot run a daemon",
                self.role
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub daemon_addr: String,
    pub role: Role,
    pub node_id: String,
    pub process_id: i32,
    pub comm_rank: i32,
    pub prog_name: String,
    pub prog_ver: String,
    /// Capacity of the staging ring for deferred publishes
    pub send_ring_capacity: usize,
    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            daemon_addr: DEFAULT_LISTEN_ADDR.to_string(),
            role: Role::Client,
            node_id: host_name(),
            process_id: std::process::id() as i32,
            comm_rank: 0,
            prog_name: std::env::args()
                .next()
                .map(|a| {
                    Path::new(&a)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or(a)
                })
                .unwrap_or_default(),
            prog_ver: env!("CARGO_PKG_VERSION").to_string(),
            send_ring_capacity: 256,
            log: LogConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn test(daemon_addr: impl Into<String>) -> Self {
        ClientConfig {
            daemon_addr: daemon_addr.into(),
            node_id: "test-node".to_string(),
            prog_name: "sos-test".to_string(),
            send_ring_capacity: 8,
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = ClientConfig::default();
        if let Ok(addr) = std::env::var("SOS_DAEMON_ADDR") {
            config.daemon_addr = addr;
        }
        if let Some(role) = std::env::var("SOS_ROLE").ok().and_then(|r| parse_role(&r)) {
            config.role = role;
        }
        if let Some(rank) = env_parse("SOS_COMM_RANK") {
            config.comm_rank = rank;
        }
        config.log = LogConfig::from_env();
        config
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }
}

fn parse_role(text: &str) -> Option<Role> {
    Role::ALL
        .iter()
        .copied()
        .find(|r| r.as_str().eq_ignore_ascii_case(text.trim()))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

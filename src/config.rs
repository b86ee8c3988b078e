//! Client configuration
//!
//! Settings are plain serde structs so they can be embedded in a host
//! application's own configuration or loaded from a standalone JSON file.

use crate::error::{LdapError, LdapResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 389;
pub const DEFAULT_PROTOCOL_VERSION: i32 = 3;
const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub protocol_version: i32,
    /// Let the native library chase referrals on our behalf
    pub chase_referrals: bool,
    /// Connect timeout applied by the native library
    pub network_timeout_ms: Option<u64>,
    /// Overall wait for an operation's results; `None` waits indefinitely
    pub operation_timeout_ms: Option<u64>,
    /// Longest single blocking wait inside the polling loop. Cancellation is
    /// observed between waits.
    pub poll_interval_ms: u64,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            chase_referrals: false,
            network_timeout_ms: None,
            operation_timeout_ms: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> LdapResult<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> LdapResult<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading client configuration");
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> LdapResult<()> {
        if self.host.trim().is_empty() {
            return Err(LdapError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(LdapError::Config("port must not be 0".to_string()));
        }
        if !(2..=3).contains(&self.protocol_version) {
            return Err(LdapError::Config(format!(
                "unsupported protocol version {}",
                self.protocol_version
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(LdapError::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.operation_timeout_ms == Some(0) {
            return Err(LdapError::Config(
                "operation_timeout_ms must be positive; omit it to wait indefinitely".to_string(),
            ));
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout_ms.map(Duration::from_millis)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the log file; the executable's directory when unset
    pub directory: Option<PathBuf>,
    pub file_name: String,
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_name: "dirclient.log".to_string(),
            filter: "info".to_string(),
        }
    }
}

// ABOUTME: Configuration for connector sessions and the connection pool
//
// Defines ConnectorConfig with all tunable parameters:
// - Upgrade path appended to every endpoint
// - Request, connect, keepalive and idle timeouts
// - Load decay and monitor cadence
// - Frame size limit

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{ConnectorError, ConnectorResult};

/// Configuration for the connector pool and its connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Path appended to the endpoint for the upgrade request
    pub connector_path: String,

    // === Timeouts ===
    /// Default time an interface waits for a response
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,

    /// Maximum time to establish the TCP connection
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,

    /// Send a ping after this long without any outgoing frame
    #[serde(with = "duration_millis")]
    pub keepalive_interval: Duration,

    /// Close a connection with no load whose busy-interface count has not
    /// moved for this long
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    // === Load accounting ===
    /// Quiet period after which one load tick is shed
    #[serde(with = "duration_millis")]
    pub load_decay_interval: Duration,

    /// Cadence of the per-connection monitor loop
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    // === Wire ===
    /// Largest string accepted in a frame, in bytes
    pub max_frame_len: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connector_path: "grid/apiconnector".to_string(),

            request_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(25_000),
            idle_timeout: Duration::from_millis(30_000),

            load_decay_interval: Duration::from_millis(3000),
            monitor_interval: Duration::from_millis(100),

            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn load(path: &Path) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ConnectorError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> ConnectorResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConnectorError::Config(e.to_string()))
    }

    /// Default location of the config file (`~/.config/gridconn/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gridconn").join("config.toml"))
    }

    /// Reject settings the monitor loop cannot run with
    pub fn validate(&self) -> ConnectorResult<()> {
        let intervals = [
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("idle_timeout", self.idle_timeout),
            ("load_decay_interval", self.load_decay_interval),
            ("monitor_interval", self.monitor_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConnectorError::Config(format!("{name} must be greater than zero")));
        }
        if self.max_frame_len == 0 {
            return Err(ConnectorError::Config(
                "max_frame_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for Duration as milliseconds (u64)
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

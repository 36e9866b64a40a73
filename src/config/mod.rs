use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service name handed to the discovery collaborator
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Upper bound on waiting for a transport to open (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Fixed delay before each reconnect attempt (milliseconds)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Consecutive connect failures after which each further failure is
    /// logged at error level
    #[serde(default = "default_failure_alert_threshold")]
    pub failure_alert_threshold: u32,
    #[serde(default)]
    pub outbound: OutboundConfig,
}

fn default_service_name() -> String {
    "chat".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_failure_alert_threshold() -> u32 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            failure_alert_threshold: default_failure_alert_threshold(),
            outbound: OutboundConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Override fields from `TOPICMUX_*` env vars. Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TOPICMUX_SERVICE_NAME") {
            if !v.is_empty() {
                self.service_name = v;
            }
        }
        if let Ok(v) = std::env::var("TOPICMUX_CONNECT_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.connect_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TOPICMUX_RECONNECT_DELAY_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.reconnect_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TOPICMUX_MAX_BUFFERED_FRAMES") {
            if let Ok(n) = v.parse::<usize>() {
                self.outbound.max_frames = Some(n);
            }
        }
    }
}

/// What to do when a bounded outbound buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered frame to make room
    #[default]
    DropOldest,
    /// Discard the frame being buffered
    RejectNewest,
}

/// Outbound buffer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Maximum frames held while disconnected; unbounded when absent
    #[serde(default)]
    pub max_frames: Option<usize>,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ClientConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.service_name, "chat");
        assert_eq!(config.connect_timeout(), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(5000));
        assert_eq!(config.failure_alert_threshold, 10);
        assert_eq!(config.outbound.max_frames, None);
        assert_eq!(config.outbound.overflow, OverflowPolicy::DropOldest);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            service_name = "realtime"
            connect_timeout_ms = 250
            reconnect_delay_ms = 2000
            failure_alert_threshold = 3

            [outbound]
            max_frames = 64
            overflow = "reject_newest"
        "#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.service_name, "realtime");
        assert_eq!(config.connect_timeout_ms, 250);
        assert_eq!(config.reconnect_delay_ms, 2000);
        assert_eq!(config.failure_alert_threshold, 3);
        assert_eq!(config.outbound.max_frames, Some(64));
        assert_eq!(config.outbound.overflow, OverflowPolicy::RejectNewest);
    }

    #[test]
    fn test_partial_config() {
        // Missing fields and sections use defaults
        let toml = r#"
            reconnect_delay_ms = 50
        "#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.reconnect_delay_ms, 50);
        assert_eq!(config.connect_timeout_ms, 1000); // Default
        assert_eq!(config.outbound.max_frames, None); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service_name = \"builds\"\nconnect_timeout_ms = 10").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.service_name, "builds");
        assert_eq!(config.connect_timeout_ms, 10);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

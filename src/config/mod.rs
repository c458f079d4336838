use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::stomp::Heartbeat;

// Re-export existing config types
pub use crate::connection::RetryPolicy;

/// Complete client configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LiveConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Broker endpoint and session behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket endpoint of the STOMP broker
    #[serde(default = "default_url")]
    pub url: String,
    /// Value of the CONNECT `host` header
    #[serde(default = "default_host")]
    pub host: String,
    /// Upper bound for upgrade plus CONNECTED
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Client heart-beat offer; 0 disables
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,
    /// How long to wait for the DISCONNECT receipt
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
    /// Accept subscriptions while not connected and replay them on connect
    #[serde(default = "default_queue_while_disconnected")]
    pub queue_while_disconnected: bool,
    /// Recent message-ids remembered per topic; 0 disables de-duplication
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

fn default_url() -> String {
    std::env::var("PRISM_WS_URL").unwrap_or_else(|_| "ws://localhost:8085/ws".to_string())
}

fn default_host() -> String {
    "/".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

fn default_disconnect_timeout_ms() -> u64 {
    2_000
}

fn default_queue_while_disconnected() -> bool {
    true
}

fn default_dedup_window() -> usize {
    256
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            host: default_host(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            queue_while_disconnected: default_queue_while_disconnected(),
            dedup_window: default_dedup_window(),
        }
    }
}

impl ConnectionConfig {
    /// Defaults pointed at `url`.
    pub fn for_endpoint(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Heart-beat offer sent in CONNECT
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat::new(
            Duration::from_millis(self.heartbeat_outgoing_ms),
            Duration::from_millis(self.heartbeat_incoming_ms),
        )
    }
}

/// Topics the `prism-live` binary subscribes to
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_watch_topics")]
    pub topics: Vec<String>,
}

fn default_watch_topics() -> Vec<String> {
    vec![crate::subscription::topics::TASKS.to_string()]
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            topics: default_watch_topics(),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: impl AsRef<Path>) -> Result<LiveConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: LiveConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = LiveConfig::default();
        assert_eq!(config.connection.host, "/");
        assert_eq!(config.connection.connect_timeout_ms, 10_000);
        assert_eq!(config.connection.heartbeat_outgoing_ms, 10_000);
        assert_eq!(config.connection.heartbeat_incoming_ms, 10_000);
        assert_eq!(config.connection.disconnect_timeout_ms, 2_000);
        assert!(config.connection.queue_while_disconnected);
        assert_eq!(config.connection.dedup_window, 256);
        assert!(!config.retry.enabled);
        assert_eq!(config.watch.topics, vec!["/topic/tasks".to_string()]);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [connection]
            url = "ws://broker.internal:9000/ws"
            host = "prism"
            connect_timeout_ms = 5000
            heartbeat_outgoing_ms = 0
            heartbeat_incoming_ms = 20000
            queue_while_disconnected = false
            dedup_window = 0

            [retry]
            enabled = true
            initial_delay_ms = 250
            max_delay_ms = 8000
            multiplier = 1.5
            jitter = false
            max_attempts = 5

            [watch]
            topics = ["/topic/tasks", "/topic/agent/a1"]
        "#;

        let config: LiveConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.url, "ws://broker.internal:9000/ws");
        assert_eq!(config.connection.host, "prism");
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.connection.heartbeat(),
            Heartbeat::new(Duration::ZERO, Duration::from_secs(20))
        );
        assert!(!config.connection.queue_while_disconnected);
        assert_eq!(config.connection.dedup_window, 0);

        assert!(config.retry.enabled);
        assert_eq!(config.retry.initial_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 8000);
        assert_eq!(config.retry.multiplier, 1.5);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.max_attempts, Some(5));

        assert_eq!(config.watch.topics.len(), 2);
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [connection]
            url = "ws://localhost:9999/ws"
        "#;

        let config: LiveConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.connection.url, "ws://localhost:9999/ws");
        assert_eq!(config.connection.disconnect_timeout(), Duration::from_secs(2));
        assert!(!config.retry.enabled);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.watch.topics, vec!["/topic/tasks".to_string()]);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nenabled = true\nmax_attempts = 3").unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.retry.enabled);
        assert_eq!(config.retry.max_attempts, Some(3));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/prism-live.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection\nurl = ").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}

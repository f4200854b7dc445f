use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::core::keepalive::KeepAliveSettings;

/// Path of the control endpoint on the engine host.
pub const CONTROL_PATH: &str = "/control/websocket";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Settings of one [`ControlClient`](crate::ControlClient).
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// WebSocket URL of the control endpoint.
    pub endpoint: String,
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay_ms: u64,
    pub keep_alive_interval_secs: u64,
    /// Silence tolerated before the link is considered dead.
    pub liveness_timeout_secs: u64,
    /// Requests without a reply after this long fail. `None` waits forever.
    pub request_timeout_ms: Option<u64>,
    pub auto_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoint_for("localhost", 8080, false),
            reconnect_delay_ms: 5_000,
            keep_alive_interval_secs: 60,
            liveness_timeout_secs: 180,
            request_timeout_ms: None,
            auto_reconnect: true,
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Reads and validates a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded client configuration from {}", path.display());
        Ok(config)
    }

    /// Checks that the endpoint is a `ws`/`wss` URL (or `mock` for the simulated engine).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let url = Url::parse(&self.endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" | "mock" => Ok(()),
            other => Err(invalid(format!("unsupported scheme '{}'", other))),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn keep_alive(&self) -> KeepAliveSettings {
        KeepAliveSettings {
            interval: Duration::from_secs(self.keep_alive_interval_secs.max(1)),
            liveness_timeout: Duration::from_secs(self.liveness_timeout_secs),
        }
    }
}

/// Builds the control endpoint URL for an engine host.
///
/// Port 443 selects `wss`, as does `secure`. Ports 80 and 443 are left out
/// of the URL.
pub fn endpoint_for(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure || port == 443 { "wss" } else { "ws" };
    match port {
        80 | 443 => format!("{}://{}{}", scheme, host, CONTROL_PATH),
        _ => format!("{}://{}:{}{}", scheme, host, port, CONTROL_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_endpoint_for() {
        assert_eq!(endpoint_for("engine.local", 80, false), "ws://engine.local/control/websocket");
        assert_eq!(endpoint_for("engine.local", 443, false), "wss://engine.local/control/websocket");
        assert_eq!(endpoint_for("engine.local", 8080, false), "ws://engine.local:8080/control/websocket");
        assert_eq!(endpoint_for("engine.local", 8443, true), "wss://engine.local:8443/control/websocket");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"endpoint": "wss://engine.local/control/websocket", "requestTimeoutMs": 2500}}"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.endpoint, "wss://engine.local/control/websocket");
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.keep_alive().interval, Duration::from_secs(60));
        assert_eq!(config.keep_alive().liveness_timeout, Duration::from_secs(180));
        assert!(config.auto_reconnect);
    }

    #[test]
    fn test_invalid_endpoint_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"endpoint": "http://engine.local/"}}"#).unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::InvalidEndpoint { .. })
        ));

        assert!(ClientConfig::with_endpoint("not a url").validate().is_err());
        assert!(ClientConfig::with_endpoint("mock://engine").validate().is_ok());
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ClientConfig::from_file(&dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(ClientConfig::from_file(file.path()), Err(ConfigError::Json(_))));
    }
}

use anyhow::{Context, Result};
use clap::Args;
use lib_control::{endpoint_for, ClientConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Args, Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[arg(long, env = "CONTROL_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "CONTROL_ENDPOINT", help = "Full WebSocket URL of the control endpoint.")]
    pub endpoint: Option<String>,

    #[arg(long, env = "CONTROL_HOST", help = "Engine host, used when no endpoint is given.")]
    pub host: Option<String>,

    #[arg(long, env = "CONTROL_PORT", help = "Engine port, used when no endpoint is given.")]
    pub port: Option<u16>,

    #[arg(long, env = "CONTROL_SECURE", help = "Use wss:// when deriving the endpoint.")]
    pub secure: Option<bool>,

    #[arg(long, env = "CONTROL_TOKEN", help = "Bearer token presented on the WebSocket handshake.")]
    pub token: Option<String>,

    #[arg(long, env = "CONTROL_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "CONTROL_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "CONTROL_RECONNECT_DELAY_MS", help = "Delay in milliseconds before reconnecting.")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, env = "CONTROL_REQUEST_TIMEOUT_MS", help = "Fail requests without a reply after this many milliseconds.")]
    pub request_timeout_ms: Option<u64>,

    #[arg(long, env = "CONTROL_KEEP_ALIVE_INTERVAL_SECS", help = "Seconds between keep-alive probes.")]
    pub keep_alive_interval_secs: Option<u64>,

    #[arg(long, env = "CONTROL_LIVENESS_TIMEOUT_SECS", help = "Seconds of silence before the link is dropped.")]
    pub liveness_timeout_secs: Option<u64>,
}

impl ProbeConfig {
    // Merge two ProbeConfig structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: ProbeConfig) -> ProbeConfig {
        ProbeConfig {
            config_path: other.config_path.or(self.config_path),
            endpoint: other.endpoint.or(self.endpoint),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            secure: other.secure.or(self.secure),
            token: other.token.or(self.token),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            keep_alive_interval_secs: other.keep_alive_interval_secs.or(self.keep_alive_interval_secs),
            liveness_timeout_secs: other.liveness_timeout_secs.or(self.liveness_timeout_secs),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Builds the library settings, deriving the endpoint from host and port if needed.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();
        let endpoint = match (&self.endpoint, &self.host) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(host)) => endpoint_for(host, self.port.unwrap_or(443), self.secure.unwrap_or(false)),
            (None, None) => defaults.endpoint.clone(),
        };
        let config = ClientConfig {
            endpoint,
            reconnect_delay_ms: self.reconnect_delay_ms.unwrap_or(defaults.reconnect_delay_ms),
            keep_alive_interval_secs: self.keep_alive_interval_secs.unwrap_or(defaults.keep_alive_interval_secs),
            liveness_timeout_secs: self.liveness_timeout_secs.unwrap_or(defaults.liveness_timeout_secs),
            request_timeout_ms: self.request_timeout_ms.or(defaults.request_timeout_ms),
            auto_reconnect: defaults.auto_reconnect,
        };
        config.validate().context("Invalid control endpoint")?;
        Ok(config)
    }
}

/// Layers defaults, then the config file, then environment and CLI values.
pub fn load_config(cli: ProbeConfig) -> ProbeConfig {
    // 1. Defaults
    let default_config = ProbeConfig {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ..Default::default()
    };

    // 2. Config file (control_probe.conf unless overridden)
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("control_probe.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<ProbeConfig>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => eprintln!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => eprintln!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    }

    // 3. Environment variables and CLI arguments win
    current_config.merge(cli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_values_override_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"host": "engine.local", "port": 8080, "logLevel": "debug", "requestTimeoutMs": 100}}"#
        )
        .unwrap();

        let cli = ProbeConfig {
            config_path: Some(file.path().to_path_buf()),
            request_timeout_ms: Some(900),
            ..Default::default()
        };
        let merged = load_config(cli);

        assert_eq!(merged.log_level(), "debug");
        assert_eq!(merged.request_timeout_ms, Some(900));
        let client = merged.client_config().unwrap();
        assert_eq!(client.endpoint, "ws://engine.local:8080/control/websocket");
        assert_eq!(client.request_timeout_ms, Some(900));
        assert_eq!(client.reconnect_delay_ms, 5_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = ProbeConfig {
            config_path: Some(dir.path().join("absent.conf")),
            host: Some("engine.local".into()),
            ..Default::default()
        };
        let merged = load_config(cli);
        assert_eq!(merged.log_dir(), PathBuf::from("./logs"));
        assert_eq!(
            merged.client_config().unwrap().endpoint,
            "wss://engine.local/control/websocket"
        );
    }

    #[test]
    fn test_bad_endpoint_is_reported() {
        let config = ProbeConfig {
            endpoint: Some("ftp://engine.local".into()),
            ..Default::default()
        };
        assert!(config.client_config().is_err());
    }
}

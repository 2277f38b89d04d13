//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;
use uuid::Uuid;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("PEERLINK_BIND_ADDR") {
            config.transport.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid PEERLINK_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(node_name) = std::env::var("PEERLINK_NODE_NAME") {
            config.link.node_name = node_name;
        }

        if let Ok(service_uuid) = std::env::var("PEERLINK_SERVICE_UUID") {
            config.link.service_uuid = service_uuid
                .parse::<Uuid>()
                .with_context(|| format!("Invalid PEERLINK_SERVICE_UUID: {}", service_uuid))?;
        }

        if let Ok(buffer_size) = std::env::var("PEERLINK_READ_BUFFER_SIZE") {
            config.transport.read_buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid PEERLINK_READ_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("PEERLINK_DIAL_TIMEOUT") {
            config.transport.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid PEERLINK_DIAL_TIMEOUT: {}", timeout))?;
        }

        if let Ok(log_level) = std::env::var("PEERLINK_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_link_config()
            .with_context(|| "Link configuration validation failed")?;

        self.validate_transport_config()
            .with_context(|| "Transport configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate link configuration
    fn validate_link_config(&self) -> Result<()> {
        if self.link.node_name.is_empty() {
            bail!("node_name must not be empty");
        }

        if self.link.node_name.len() > 64 {
            bail!("node_name cannot exceed 64 characters");
        }

        if self.link.service_uuid.is_nil() {
            bail!("service_uuid must not be the nil UUID");
        }

        Ok(())
    }

    /// Validate transport configuration
    fn validate_transport_config(&self) -> Result<()> {
        if self.transport.read_buffer_size < 64 {
            bail!("read_buffer_size must be at least 64 bytes");
        }

        if self.transport.read_buffer_size > 1048576 {
            bail!("read_buffer_size cannot exceed 1MB");
        }

        if self.transport.dial_timeout.as_millis() == 0 {
            bail!("dial_timeout must be greater than 0");
        }

        if self.transport.dial_timeout.as_secs() > 300 {
            bail!("dial_timeout cannot exceed 5 minutes");
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        node_name: Option<&str>,
        timeout: Option<u64>,
        buffer_size: Option<usize>,
    ) {
        // Override bind address if provided
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.transport.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        // Override port if provided
        if let Some(port) = port {
            self.transport.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        // Override node name if provided
        if let Some(node_name) = node_name {
            self.link.node_name = node_name.to_string();
            tracing::info!("CLI override: node name set to {}", node_name);
        }

        // Override dial timeout if provided
        if let Some(timeout_secs) = timeout {
            self.transport.dial_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: dial timeout set to {}s", timeout_secs);
        }

        // Override read buffer size if provided
        if let Some(buffer_size) = buffer_size {
            self.transport.read_buffer_size = buffer_size;
            tracing::info!("CLI override: read buffer size set to {} bytes", buffer_size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[link]
service_uuid = "fa87c0d0-afac-11de-8a39-0800200c9a66"
node_name = "test-node"

[transport]
bind_addr = "127.0.0.1:9000"
read_buffer_size = 4096
dial_timeout = "30s"

[monitoring]
log_level = "debug"
"#
        )
        .unwrap();

        let config = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(config.link.node_name, "test-node");
        assert_eq!(config.transport.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.transport.read_buffer_size, 4096);
        assert_eq!(config.transport.dial_timeout, Duration::from_secs(30));
        assert_eq!(config.monitoring.log_level, "debug");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            ConfigManager::load_from_file(Path::new("/nonexistent/peerlink.toml")).unwrap();
        assert_eq!(config.link.node_name, "peerlink");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        config.link.node_name = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.read_buffer_size = 8;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.dial_timeout = Duration::from_secs(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitoring.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_args_take_precedence() {
        let mut config = Config::default();
        config.merge_with_cli_args(
            Some("0.0.0.0:4242"),
            Some(5000),
            Some("cli-node"),
            Some(42),
            Some(2048),
        );

        assert_eq!(config.transport.bind_addr, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.link.node_name, "cli-node");
        assert_eq!(config.transport.dial_timeout, Duration::from_secs(42));
        assert_eq!(config.transport.read_buffer_size, 2048);
    }
}

//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values. Buffer capacity
//! and listen backlog are compile-time constants and not configurable.

use crate::link::{Credentials, RetryPolicy};
use crate::server::DEFAULT_PORT;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "solo-echo")]
#[command(author = "solo-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-client TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Network association attempts before giving up
    #[arg(long)]
    pub link_attempts: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Network link configuration
#[derive(Debug, Deserialize)]
pub struct LinkConfig {
    pub ssid: Option<String>,
    pub passphrase: Option<String>,
    /// Association attempts
    #[serde(default = "default_link_attempts")]
    pub attempts: u32,
    /// Per-attempt association timeout in milliseconds
    #[serde(default = "default_link_timeout_ms")]
    pub timeout_ms: u64,
    /// First retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Upper bound on the retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Link readiness checks during bring-up
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ssid: None,
            passphrase: None,
            attempts: default_link_attempts(),
            timeout_ms: default_link_timeout_ms(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            readiness_attempts: default_readiness_attempts(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_link_attempts() -> u32 {
    5
}

fn default_link_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_readiness_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub credentials: Credentials,
    /// Retry policy for network association.
    pub association: RetryPolicy,
    /// Retry policy for link readiness checks during bring-up.
    pub readiness: RetryPolicy,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over TOML config.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let link = toml_config.link;
        let backoff = |attempts| RetryPolicy {
            attempts,
            timeout: Duration::from_millis(link.timeout_ms),
            initial_backoff: Duration::from_millis(link.backoff_ms),
            max_backoff: Duration::from_millis(link.max_backoff_ms),
        };

        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            association: backoff(cli.link_attempts.unwrap_or(link.attempts)),
            readiness: backoff(link.readiness_attempts),
            credentials: Credentials {
                ssid: link.ssid,
                passphrase: link.passphrase,
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.server.port, 4242);
        assert_eq!(config.link.attempts, 5);
        assert_eq!(config.link.timeout_ms, 30_000);
        assert!(config.link.ssid.is_none());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 5000

            [link]
            ssid = "lab"
            passphrase = "secret"
            attempts = 2
            backoff_ms = 100

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.link.ssid.as_deref(), Some("lab"));
        assert_eq!(config.link.attempts, 2);
        assert_eq!(config.link.backoff_ms, 100);
        assert_eq!(config.link.max_backoff_ms, 8_000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::parse_from(["solo-echo", "--port", "6000", "--link-attempts", "9"]);
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 5000
            [link]
            attempts = 2
            readiness_attempts = 4
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.port, 6000);
        assert_eq!(config.association.attempts, 9);
        assert_eq!(config.readiness.attempts, 4);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.association.timeout, Duration::from_secs(30));
    }
}

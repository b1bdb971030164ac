//! Configuration module for the poll-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::MAX_BATCH;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "poll-echo")]
#[command(author = "poll-echo authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Echo server with multiple client support via a readiness event loop",
    long_about = None
)]
pub struct CliArgs {
    /// Address to bind to [default: 127.0.0.1]
    pub address: Option<String>,

    /// Port to bind to [default: 8888]
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pending-connection queue length of the listening socket
    #[arg(short, long)]
    pub backlog: Option<i32>,

    /// Maximum ready events handled per wait (1-1024)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum number of simultaneous client connections
    #[arg(short, long)]
    pub max_connections: Option<usize>,

    /// Message framing used to decide what gets echoed
    #[arg(short, long, value_enum)]
    pub framing: Option<Framing>,

    /// Bytes requested from a socket per read
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Largest line or length-prefixed frame accepted
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Messages handled per connection before yielding to others
    #[arg(long)]
    pub read_budget: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// What one echoed message is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Whatever a single read returns
    Raw,
    /// Newline-terminated lines
    Line,
    /// `<length>\r\n<data>` frames
    Length,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub event_loop: EventLoopConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and connection configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            idle_timeout: 0,
        }
    }
}

/// Event loop tuning
#[derive(Debug, Deserialize)]
pub struct EventLoopConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_read_budget")]
    pub read_budget: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            read_budget: default_read_budget(),
        }
    }
}

/// Framing configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_framing")]
    pub framing: Framing,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            framing: default_framing(),
            buffer_size: default_buffer_size(),
            max_frame_size: default_max_frame_size(),
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

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_backlog() -> i32 {
    128
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    MAX_BATCH
}

fn default_read_budget() -> usize {
    32
}

fn default_framing() -> Framing {
    Framing::Raw
}

fn default_buffer_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_max_frame_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub batch_size: usize,
    pub max_connections: usize,
    pub read_budget: usize,
    /// Seconds; 0 disables idle reaping.
    pub idle_timeout: u64,
    pub framing: Framing,
    pub buffer_size: usize,
    pub max_frame_size: usize,
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

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let address = cli.address.unwrap_or(toml_config.server.address);
        let ip: IpAddr = address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(address.clone()))?;
        let port = cli.port.unwrap_or(toml_config.server.port);

        let config = Config {
            listen: SocketAddr::new(ip, port),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            batch_size: cli.batch_size.unwrap_or(toml_config.event_loop.batch_size),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            read_budget: cli.read_budget.unwrap_or(toml_config.event_loop.read_budget),
            idle_timeout: cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout),
            framing: cli.framing.unwrap_or(toml_config.protocol.framing),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.protocol.buffer_size),
            max_frame_size: cli
                .max_frame_size
                .unwrap_or(toml_config.protocol.max_frame_size),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH, self.batch_size
            )));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid(format!(
                "backlog must be positive, got {}",
                self.backlog
            )));
        }
        for (name, value) in [
            ("max_connections", self.max_connections),
            ("read_budget", self.read_budget),
            ("buffer_size", self.buffer_size),
            ("max_frame_size", self.max_frame_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
    Invalid(String),
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
            ConfigError::InvalidAddress(address) => {
                write!(f, "Invalid bind address '{}'", address)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("poll-echo").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8888".parse().unwrap());
        assert_eq!(config.backlog, 128);
        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.framing, Framing::Raw);
        assert_eq!(config.idle_timeout, 0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_positional_address_and_port() {
        let config = Config::merge(cli(&["0.0.0.0", "9000"]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000".parse().unwrap());

        let config = Config::merge(cli(&["::1"]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "[::1]:8888".parse().unwrap());
    }

    #[test]
    fn test_invalid_port_rejected_by_cli() {
        let args = ["poll-echo", "127.0.0.1", "notaport"];
        assert!(CliArgs::try_parse_from(args).is_err());
    }

    #[test]
    fn test_invalid_address() {
        let err = Config::merge(cli(&["localhost"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(ref a) if a == "localhost"));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            address = "0.0.0.0"
            port = 7000
            backlog = 3
            max_connections = 64
            idle_timeout = 30

            [event_loop]
            batch_size = 256
            read_budget = 8

            [protocol]
            framing = "line"
            max_frame_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.backlog, 3);
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.idle_timeout, 30);
        assert_eq!(config.event_loop.batch_size, 256);
        assert_eq!(config.event_loop.read_budget, 8);
        assert_eq!(config.protocol.framing, Framing::Line);
        assert_eq!(config.protocol.buffer_size, 16 * 1024);
        assert_eq!(config.protocol.max_frame_size, 4096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 7000
            backlog = 3

            [protocol]
            framing = "length"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["--framing", "line", "-b", "16"]), toml_config).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.backlog, 16);
        assert_eq!(config.framing, Framing::Line);
    }

    #[test]
    fn test_batch_size_bounds() {
        assert!(Config::merge(cli(&["--batch-size", "0"]), TomlConfig::default()).is_err());
        assert!(Config::merge(cli(&["--batch-size", "1025"]), TomlConfig::default()).is_err());
        assert!(Config::merge(cli(&["--batch-size", "1"]), TomlConfig::default()).is_ok());

        let max = MAX_BATCH.to_string();
        let config =
            Config::merge(cli(&["--batch-size", max.as_str()]), TomlConfig::default()).unwrap();
        assert_eq!(config.batch_size, MAX_BATCH);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let err = Config::merge(cli(&["--read-budget", "0"]), TomlConfig::default()).unwrap_err();
        assert!(err.to_string().contains("read_budget"));
    }
}

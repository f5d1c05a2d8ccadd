//! Configuration for the benchmark harness.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values. The resolved
//! configuration is immutable; workers receive copies of the fields they
//! need and never write back.

use crate::strategy::StrategyKind;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the benchmark harness
#[derive(Parser, Debug)]
#[command(name = "scatterbench")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo benchmark comparing send strategies", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the echo server
    Serve {
        /// Address to bind to (e.g., 0.0.0.0:8082)
        #[arg(short, long)]
        listen: Option<String>,

        /// Total message size in bytes
        #[arg(short, long)]
        message_size: Option<usize>,

        /// Transmission strategy
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyKind>,
    },
    /// Run the load-generating client
    Bench {
        /// Server host name or address
        #[arg(long)]
        host: Option<String>,

        /// Server TCP port
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of concurrent connections
        #[arg(short = 'n', long)]
        connections: Option<usize>,

        /// Total message size in bytes
        #[arg(short, long)]
        message_size: Option<usize>,

        /// Run duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Transmission strategy
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyKind>,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerTable,
    #[serde(default)]
    pub client: ClientTable,
    #[serde(default)]
    pub logging: LoggingTable,
}

/// `[server]` table
#[derive(Debug, Deserialize)]
pub struct ServerTable {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Total message size in bytes
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    /// Transmission strategy
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
}

impl Default for ServerTable {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            message_size: default_message_size(),
            strategy: default_strategy(),
        }
    }
}

/// `[client]` table
#[derive(Debug, Deserialize)]
pub struct ClientTable {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of concurrent connections
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// Total message size in bytes
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    /// Run duration in seconds
    #[serde(default = "default_duration")]
    pub duration: u64,
    /// Transmission strategy
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
}

impl Default for ClientTable {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connections: default_connections(),
            message_size: default_message_size(),
            duration: default_duration(),
            strategy: default_strategy(),
        }
    }
}

/// `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingTable {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingTable {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8082".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_connections() -> usize {
    1
}

fn default_message_size() -> usize {
    128
}

fn default_duration() -> u64 {
    10
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Buffered
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved server parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub message_size: usize,
    pub strategy: StrategyKind,
}

/// Resolved client parameters
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connections: usize,
    pub message_size: usize,
    pub duration: u64,
    pub strategy: StrategyKind,
}

/// Which role this process runs
#[derive(Debug, Clone)]
pub enum Role {
    Server(ServerConfig),
    Client(ClientConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        let role = match cli.command {
            Command::Serve {
                listen,
                message_size,
                strategy,
            } => Role::Server(ServerConfig {
                listen: listen.unwrap_or(toml_config.server.listen),
                message_size: message_size.unwrap_or(toml_config.server.message_size),
                strategy: strategy.unwrap_or(toml_config.server.strategy),
            }),
            Command::Bench {
                host,
                port,
                connections,
                message_size,
                duration,
                strategy,
            } => Role::Client(ClientConfig {
                host: host.unwrap_or(toml_config.client.host),
                port: port.unwrap_or(toml_config.client.port),
                connections: connections.unwrap_or(toml_config.client.connections),
                message_size: message_size.unwrap_or(toml_config.client.message_size),
                duration: duration.unwrap_or(toml_config.client.duration),
                strategy: strategy.unwrap_or(toml_config.client.strategy),
            }),
        };

        let strategy = match &role {
            Role::Server(c) => c.strategy,
            Role::Client(c) => c.strategy,
        };
        if strategy == StrategyKind::ZeroCopy && !cfg!(target_os = "linux") {
            return Err(ConfigError::StrategyUnsupported(strategy));
        }

        Ok(Config {
            role,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    StrategyUnsupported(StrategyKind),
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
            ConfigError::StrategyUnsupported(strategy) => {
                write!(f, "Strategy {strategy:?} is not supported on this platform")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

//! Configuration for the reverse-tcp server and client.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::MAX_PAYLOAD_LEN;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "reverse-tcp")]
#[command(author = "reverse-tcp authors")]
#[command(version = "0.1.0")]
#[command(about = "Reverse text block by block over a framed TCP protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and answer reversal requests
    Server(ServerArgs),
    /// Send a text file to a server and save its reversal
    Client(ClientArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Port to listen on
    pub port: Option<u16>,

    /// Interface to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Listen queue length
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum number of sessions served at once
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server address
    pub server_ip: String,

    /// Server port
    pub server_port: u16,

    /// Text file to reverse
    pub file: PathBuf,

    /// Minimum block length
    pub min_len: Option<usize>,

    /// Maximum block length
    pub max_len: Option<usize>,

    /// Where to write the result (defaults to `<file stem>_reversed.txt`)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    pub workers: Option<usize>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            workers: None,
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ClientSection {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_backlog() -> i32 {
    5
}

fn default_max_connections() -> usize {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,
    pub workers: Option<usize>,
}

impl ServerConfig {
    /// `host:port` string to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let section = ServerSection::default();
        Self {
            host: section.host,
            port: section.port,
            backlog: section.backlog,
            max_connections: section.max_connections,
            workers: section.workers,
        }
    }
}

/// Resolved client settings, already validated
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_ip: String,
    pub server_port: u16,
    pub source: PathBuf,
    pub output: Option<PathBuf>,
    pub min_len: usize,
    pub max_len: usize,
}

impl ClientConfig {
    /// Check `1 <= min_len <= max_len <= MAX_PAYLOAD_LEN`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_len == 0 || self.min_len > self.max_len || self.max_len > MAX_PAYLOAD_LEN {
            return Err(ConfigError::InvalidBlockRange {
                min: self.min_len,
                max: self.max_len,
            });
        }
        Ok(())
    }

    /// `ip:port` string to dial.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }
}

/// Which program to run.
#[derive(Debug, Clone)]
pub enum Mode {
    Server(ServerConfig),
    Client(ClientConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: Mode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments against the TOML file they name.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
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

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let log_level = cli.log_level.unwrap_or(toml_config.logging.level);

        let mode = match cli.command {
            Command::Server(args) => {
                let server = toml_config.server;
                Mode::Server(ServerConfig {
                    host: args.host.unwrap_or(server.host),
                    port: args.port.unwrap_or(server.port),
                    backlog: args.backlog.unwrap_or(server.backlog),
                    max_connections: args.max_connections.unwrap_or(server.max_connections),
                    workers: args.workers.or(server.workers),
                })
            }
            Command::Client(args) => {
                let client = toml_config.client;
                let config = ClientConfig {
                    server_ip: args.server_ip,
                    server_port: args.server_port,
                    source: args.file,
                    output: args.output,
                    min_len: args
                        .min_len
                        .or(client.min_len)
                        .ok_or(ConfigError::MissingBlockLength("min_len"))?,
                    max_len: args
                        .max_len
                        .or(client.max_len)
                        .ok_or(ConfigError::MissingBlockLength("max_len"))?,
                };
                config.validate()?;
                Mode::Client(config)
            }
        };

        Ok(Config { log_level, mode })
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Missing {0}: pass it on the command line or set it under [client]")]
    MissingBlockLength(&'static str),

    #[error("Invalid block lengths: need 1 <= min ({min}) <= max ({max}) <= {}", MAX_PAYLOAD_LEN)]
    InvalidBlockRange { min: usize, max: usize },
}

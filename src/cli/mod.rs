// ABOUTME: CLI argument parsing and command routing for gridconn
//
// Provides command-line interface for:
// - Issuing one request through the connector (request)
// - Printing the effective configuration (config)

pub mod config;
pub mod request;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gridconn::ConnectorConfig;

/// Multiplexed grid API connector client
#[derive(Debug, Parser)]
#[command(name = "gridconn")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ~/.config/gridconn/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log as JSON lines instead of text
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Dial an endpoint and issue one request
    Request(RequestArgs),

    /// Print the effective configuration as TOML
    Config,
}

/// Arguments for the request command
#[derive(Debug, clap::Args)]
pub struct RequestArgs {
    /// API endpoint, e.g. https://api.example.com/
    pub endpoint: String,

    /// Request type sent alongside the payload
    pub request_type: String,

    /// Request payload as JSON
    #[arg(long, default_value = "{}")]
    pub payload: String,

    /// Response timeout in milliseconds (defaults to request_timeout)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Resolve the configuration for this run
///
/// An explicit path must exist. Without one the default location is used
/// if a file is there, otherwise built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<ConnectorConfig> {
    if let Some(path) = path {
        return ConnectorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    match ConnectorConfig::default_path() {
        Some(default) if default.exists() => ConnectorConfig::load(&default)
            .with_context(|| format!("Failed to load config from {}", default.display())),
        _ => Ok(ConnectorConfig::default()),
    }
}

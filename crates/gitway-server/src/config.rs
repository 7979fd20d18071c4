//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `GITWAY_*` environment variables. Command-line flags are applied on top by
//! the binary.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::observability::LogFormat;
use crate::rpc::RpcTimeouts;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "gitway.yaml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "GITWAY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the gitway server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,
    /// Directory repository prefixes are resolved against.
    pub repo_root: PathBuf,
    /// Git executable.
    pub git_binary: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Deadline for ref advertisement and `update-server-info`.
    pub advertise_timeout_secs: u64,
    /// Deadline for a whole upload-pack / receive-pack exchange.
    pub rpc_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            repo_root: PathBuf::from("."),
            git_binary: PathBuf::from("git"),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            advertise_timeout_secs: 60,
            rpc_timeout_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path` (required when given, otherwise
    /// [`DEFAULT_CONFIG_FILE`] if present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: ServerConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.advertise_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "advertise_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "rpc_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.git_binary.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("git_binary must not be empty".into()));
        }
        Ok(())
    }

    /// Subprocess deadlines.
    pub fn timeouts(&self) -> RpcTimeouts {
        RpcTimeouts {
            advertise: Duration::from_secs(self.advertise_timeout_secs),
            rpc: Duration::from_secs(self.rpc_timeout_secs),
        }
    }
}

//! Server configuration parsing and validation.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::mode::OutputMode;
use crate::server::Endpoint;
use crate::{AppError, Result};

/// Maximum accepted request line length: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

fn default_address() -> String {
    "cmdsock.sock".into()
}

fn default_true() -> bool {
    true
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

/// Server configuration parsed from `cmdsock.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Listening address: a Unix socket path or a TCP `host:port` pair.
    #[serde(default = "default_address")]
    pub address: String,
    /// How results are rendered back to callers.
    #[serde(default)]
    pub output: OutputMode,
    /// Whether a synthetic `help` command is provided when none is registered.
    #[serde(default = "default_true")]
    pub help: bool,
    /// Longest request line accepted before the connection is aborted.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            output: OutputMode::default(),
            help: true,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed listening endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the address is empty or malformed.
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.address.parse()
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        self.endpoint()?;
        Ok(())
    }
}

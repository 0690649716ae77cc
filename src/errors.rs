//! Error types shared across the command server.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all command-server failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket I/O failure.
    Io(String),
    /// Line framing failure (for example an over-long line).
    Codec(String),
    /// No command is registered under the requested name.
    UnknownCommand(String),
    /// The command is registered but has no invocable handler.
    InvalidHandler(String),
    /// A handler reported failure or panicked.
    Handler(String),
    /// A live listener already owns the requested address.
    AddressInUse(String),
    /// Listener or connection transport failure.
    Transport(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::UnknownCommand(name) => write!(f, "unknown command: {name}"),
            Self::InvalidHandler(name) => write!(f, "invalid handler: {name}"),
            Self::Handler(msg) => write!(f, "{msg}"),
            Self::AddressInUse(addr) => write!(f, "address in use: {addr}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

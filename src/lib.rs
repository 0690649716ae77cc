#![forbid(unsafe_code)]

//! `cmdsock` — a line-oriented remote command server.
//!
//! A host process registers named handlers in a [`CommandTable`], starts a
//! [`Server`] on a Unix socket or loopback TCP port, and operators trigger
//! those handlers by sending one text line per command:
//!
//! ```text
//! resetPassword user%40example.com
//! ```
//!
//! Each connection runs its own decode → dispatch → write pipeline:
//!
//! - [`protocol::codec`] frames bytes into token lists,
//! - [`command::Dispatcher`] resolves and runs handlers,
//! - [`server`] owns the listener and the live connection set.

pub mod builtin;
pub mod command;
pub mod config;
pub mod errors;
pub mod mode;
pub mod protocol;
pub mod server;

pub use command::{Command, CommandTable, Handler};
pub use config::ServerConfig;
pub use errors::{AppError, Result};
pub use mode::OutputMode;
pub use server::{BoundAddress, Endpoint, Server, ServerOptions};

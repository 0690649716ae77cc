//! Line protocol shared by the server and `cmdsock-ctl`.
//!
//! Each request is one `\n`-terminated line: a command name followed by
//! space-separated, percent-encoded arguments. Each response is one line.
//!
//! Request:
//! ```text
//! resetPassword user%40example.com
//! ```
//!
//! Response (text mode):
//! ```text
//! ok user@example.com
//! ERROR: no such user
//! ```
//!
//! Response (structured mode):
//! ```json
//! ["ok","user@example.com"]
//! {"error":"no such user"}
//! ```

pub mod codec;
pub mod escape;

use serde::Serialize;

use crate::AppError;

/// One decoded request line; element 0 is the command name.
pub type TokenList = Vec<String>;

/// Prefix of every failure line written in text mode and on the abort path.
pub const ERROR_PREFIX: &str = "ERROR: ";

/// One unit of output produced for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Output {
    /// A complete, newline-terminated text line.
    Text(String),
    /// Ordered result values (structured mode success).
    Values(Vec<String>),
    /// Error object (structured mode failure).
    Failure {
        /// Human-readable failure message.
        error: String,
    },
}

impl Output {
    /// Text line reporting `err`, as written before a connection is aborted.
    #[must_use]
    pub fn error_line(err: &AppError) -> Self {
        Self::Text(format!("{ERROR_PREFIX}{err}\n"))
    }
}

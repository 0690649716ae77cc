//! Built-in command table served by the `cmdsock` binary.
//!
//! Host applications embedding the library register their own commands;
//! these exist so a bare server is useful for smoke tests and health checks.

use std::time::{Duration, Instant};

use crate::command::{Command, CommandTable};
use crate::{AppError, Result};

/// Crate version reported by the `version` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest delay the `sleep` command accepts, in milliseconds.
pub const MAX_SLEEP_MS: u64 = 60_000;

/// Build the built-in command table.
///
/// | Command   | Arguments | Result                          |
/// |-----------|-----------|---------------------------------|
/// | `echo`    | `text...` | the arguments, unchanged        |
/// | `ping`    |           | `pong`                          |
/// | `version` |           | crate version                   |
/// | `time`    |           | current UTC time, RFC 3339      |
/// | `uptime`  |           | seconds since the table was built |
/// | `sleep`   | `millis`  | `slept <millis>` after the delay |
///
/// # Errors
///
/// Returns `AppError::Config` if a built-in name is rejected by the table.
pub fn command_table() -> Result<CommandTable> {
    let started = Instant::now();
    let mut table = CommandTable::new();

    table.register(Command::new("echo", ["text..."], echo))?;
    table.register(Command::new("ping", NO_ARGUMENTS, ping))?;
    table.register(Command::new("version", NO_ARGUMENTS, version))?;
    table.register(Command::new("time", NO_ARGUMENTS, time))?;
    table.register(Command::new(
        "uptime",
        NO_ARGUMENTS,
        move |_args: Vec<String>| async move {
            Ok::<_, AppError>(vec![started.elapsed().as_secs().to_string()])
        },
    ))?;
    table.register(Command::new("sleep", ["millis"], sleep))?;

    Ok(table)
}

const NO_ARGUMENTS: [&str; 0] = [];

async fn echo(args: Vec<String>) -> Result<Vec<String>> {
    Ok(args)
}

async fn ping(_args: Vec<String>) -> Result<Vec<String>> {
    Ok(vec!["pong".to_owned()])
}

async fn version(_args: Vec<String>) -> Result<Vec<String>> {
    Ok(vec![VERSION.to_owned()])
}

async fn time(_args: Vec<String>) -> Result<Vec<String>> {
    Ok(vec![chrono::Utc::now().to_rfc3339()])
}

async fn sleep(args: Vec<String>) -> Result<Vec<String>> {
    let millis = parse_millis(&args)?;
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(vec!["slept".to_owned(), millis.to_string()])
}

fn parse_millis(args: &[String]) -> Result<u64> {
    let raw = args
        .first()
        .ok_or_else(|| AppError::Handler("usage: sleep <millis>".into()))?;
    let millis = raw
        .parse::<u64>()
        .map_err(|err| AppError::Handler(format!("invalid millis '{raw}': {err}")))?;
    if millis > MAX_SLEEP_MS {
        return Err(AppError::Handler(format!(
            "millis must not exceed {MAX_SLEEP_MS}"
        )));
    }
    Ok(millis)
}

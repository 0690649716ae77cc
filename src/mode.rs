//! Output mode — how a connection renders command results.
//!
//! `OutputMode` is accepted as the `--output` CLI flag value and as the
//! `output` key of the TOML configuration.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Rendering mode chosen once per server and applied to every connection.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Results joined by single spaces, failures as `ERROR: <message>`. Default.
    #[default]
    Text,
    /// Results as an ordered value list, failures as an error object.
    Structured,
}

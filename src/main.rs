#![forbid(unsafe_code)]

//! `cmdsock` — command server host binary.
//!
//! Loads configuration, registers the built-in command table, listens on
//! the configured Unix socket or TCP port, and stops cleanly on Ctrl-C or
//! SIGTERM.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use cmdsock::{builtin, AppError, OutputMode, Result, Server, ServerConfig, ServerOptions};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cmdsock", about = "Line-oriented command server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listening address; overrides the configuration file.
    #[arg(long)]
    address: Option<String>,

    /// Output mode; overrides the configuration file.
    #[arg(long, value_enum)]
    output: Option<OutputMode>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("cmdsock server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => ServerConfig::load_from_path(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    config.validate()?;
    let endpoint = config.endpoint()?;
    info!(address = %endpoint, output = ?config.output, "configuration loaded");

    // ── Start the server ────────────────────────────────
    let server = Server::with_commands(builtin::command_table()?, ServerOptions::from(&config));
    let address = server.start(&endpoint).await.map_err(|err| {
        error!(%err, "failed to start command server");
        err
    })?;
    info!(%address, commands = server.commands().len(), "cmdsock ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    server.stop().await?;
    info!("cmdsock shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

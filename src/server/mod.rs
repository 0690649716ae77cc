//! Connection server.
//!
//! Owns the listening socket, the command table, and the set of live
//! connections. Each accepted connection gets its own codec + dispatcher
//! pipeline over a snapshot of the command table taken at accept time.
//!
//! [`Server::start`] and [`Server::stop`] are idempotent: starting a
//! running server reports the address it is already bound to, stopping a
//! stopped server does nothing.

mod connection;
pub mod endpoint;
mod registry;

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::command::{Command, CommandTable, Dispatcher, DispatcherOptions};
use crate::config::{ServerConfig, DEFAULT_MAX_LINE_BYTES};
use crate::mode::OutputMode;
use crate::{AppError, Result};

pub use endpoint::{BoundAddress, BoxedStream, ConnectionStream, Endpoint};

use endpoint::Listener;
use registry::ConnectionRegistry;

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Behaviour shared by every connection of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// How results are rendered.
    pub output: OutputMode,
    /// Provide a synthetic `help` command when none is registered.
    pub help: bool,
    /// Longest accepted request line in bytes.
    pub max_line_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            output: OutputMode::Text,
            help: true,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl From<&ServerConfig> for ServerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            output: config.output,
            help: config.help,
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// State reachable from the accept loop.
#[derive(Debug)]
struct Shared {
    commands: RwLock<Arc<CommandTable>>,
    options: ServerOptions,
    connections: Arc<ConnectionRegistry>,
}

impl Shared {
    fn snapshot(&self) -> Arc<CommandTable> {
        Arc::clone(&self.commands.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Register and spawn the pipeline for a freshly accepted connection.
    fn spawn_connection(&self, stream: BoxedStream, peer: String, shutdown: &CancellationToken) {
        let cancel = shutdown.child_token();
        let registration = self.connections.register(cancel.clone());
        let dispatcher = Dispatcher::new(
            self.snapshot(),
            DispatcherOptions {
                output: self.options.output,
                help: self.options.help,
            },
        );
        let max_line_bytes = self.options.max_line_bytes;

        tokio::spawn(async move {
            let connection_id = registration.id();
            connection::serve(
                stream,
                connection_id,
                peer,
                dispatcher,
                max_line_bytes,
                cancel,
            )
            .await;
            drop(registration);
        });
    }
}

/// Running listener state; `None` in [`Server`] means stopped.
#[derive(Debug)]
struct Listening {
    address: BoundAddress,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// Line-protocol command server.
#[derive(Debug)]
pub struct Server {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Listening>>,
}

impl Server {
    /// Server with an empty command table.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self::with_commands(CommandTable::new(), options)
    }

    /// Server serving `commands`.
    #[must_use]
    pub fn with_commands(commands: CommandTable, options: ServerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                commands: RwLock::new(Arc::new(commands)),
                options,
                connections: Arc::new(ConnectionRegistry::default()),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// Add or replace a command.
    ///
    /// Connections accepted afterwards see the change; open connections
    /// keep the table they started with.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the command name is empty.
    pub fn register(&self, command: Command) -> Result<Option<Command>> {
        let mut table = self
            .shared
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let name = command.name().to_owned();
        let replaced = Arc::make_mut(&mut table).register(command)?;
        debug!(command = %name, replaced = replaced.is_some(), "command registered");
        Ok(replaced)
    }

    /// Remove a command by name.
    pub fn unregister(&self, name: &str) -> Option<Command> {
        let mut table = self
            .shared
            .commands
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = Arc::make_mut(&mut table).unregister(name);
        debug!(command = %name, removed = removed.is_some(), "command unregistered");
        removed
    }

    /// Current command table.
    #[must_use]
    pub fn commands(&self) -> Arc<CommandTable> {
        self.shared.snapshot()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Ids of open connections, ascending.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<u64> {
        self.shared.connections.ids()
    }

    /// Bound address while listening, `None` while stopped.
    pub async fn address(&self) -> Option<BoundAddress> {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|listening| listening.address.clone())
    }

    /// Start listening on `endpoint`.
    ///
    /// When already listening, returns the current address without
    /// rebinding, whatever `endpoint` is. For a Unix socket path, a
    /// leftover socket file nobody answers on is removed first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AddressInUse` if a live listener owns the
    /// address, `AppError::Transport` for other bind failures.
    pub async fn start(&self, endpoint: &Endpoint) -> Result<BoundAddress> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(listening) = lifecycle.as_ref() {
            debug!(address = %listening.address, "server already listening");
            return Ok(listening.address.clone());
        }

        let (listener, address) = endpoint::bind(endpoint).await?;
        let shutdown = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            shutdown.clone(),
            address.clone(),
        ));

        info!(%address, "command server listening");
        *lifecycle = Some(Listening {
            address: address.clone(),
            shutdown,
            accept_task,
        });
        Ok(address)
    }

    /// Stop listening and destroy every open connection.
    ///
    /// Connections are closed immediately; requests still running are
    /// abandoned and their results discarded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the accept loop panicked.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(listening) = lifecycle.take() else {
            return Ok(());
        };

        let destroyed = self.shared.connections.destroy_all();
        listening.shutdown.cancel();
        let joined = listening.accept_task.await;
        // A connection accepted while the loop was winding down is cancelled
        // through the shutdown token; drop its entry too.
        let destroyed = destroyed + self.shared.connections.destroy_all();
        endpoint::cleanup(&listening.address);

        joined.map_err(|err| AppError::Transport(format!("accept loop failed: {err}")))?;
        info!(address = %listening.address, connections = destroyed, "command server stopped");
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(listening) = self.lifecycle.get_mut().take() {
            listening.shutdown.cancel();
        }
    }
}

async fn accept_loop(
    listener: Listener,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    address: BoundAddress,
) {
    let span = info_span!("cmd_server", address = %address);
    async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("accept loop shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => shared.spawn_connection(stream, peer, &shutdown),
                        Err(err) => {
                            warn!(%err, "accept failed");
                            if !accept_backoff(&shutdown, ACCEPT_ERROR_BACKOFF).await {
                                debug!("accept loop shutting down during backoff");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
    .instrument(span)
    .await;
}

/// Wait out an accept error; `false` when shutdown fired first.
async fn accept_backoff(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

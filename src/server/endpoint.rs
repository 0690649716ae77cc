//! Listening endpoints: address parsing, binding, and socket file hygiene.

use std::fmt::{Display, Formatter};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use crate::{AppError, Result};

/// Host used when an address is given as a bare port number.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Address a server is asked to listen on.
///
/// Parsed from its string form by shape:
///
/// | Form                 | Endpoint                    |
/// |----------------------|-----------------------------|
/// | `unix:<path>`        | Unix socket at `<path>`     |
/// | `tcp://<host>:<port>`| TCP                         |
/// | `<host>:<port>`      | TCP (no `/` in the address) |
/// | `<port>`             | TCP on `127.0.0.1`          |
/// | anything else        | Unix socket path            |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket at a filesystem path.
    Unix(PathBuf),
    /// TCP host/port pair.
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// Port; `0` lets the OS choose.
        port: u16,
    },
}

impl Endpoint {
    /// Unix socket endpoint.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }

    /// TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for Endpoint {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::Config("address must not be empty".into()));
        }

        if let Some(path) = raw.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(AppError::Config(format!("invalid unix address '{raw}'")));
            }
            return Ok(Self::unix(path));
        }

        if let Some(rest) = raw.strip_prefix("tcp://") {
            return parse_host_port(rest)
                .ok_or_else(|| AppError::Config(format!("invalid tcp address '{raw}'")));
        }

        if let Ok(port) = raw.parse::<u16>() {
            return Ok(Self::tcp(DEFAULT_TCP_HOST, port));
        }

        if !raw.contains('/') {
            if let Some(endpoint) = parse_host_port(raw) {
                return Ok(endpoint);
            }
        }

        Ok(Self::unix(raw))
    }
}

fn parse_host_port(raw: &str) -> Option<Endpoint> {
    let (host, port) = raw.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { DEFAULT_TCP_HOST } else { host };
    Some(Endpoint::tcp(host, port))
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Address a running server is actually bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    /// Unix socket path.
    Unix(PathBuf),
    /// Resolved TCP socket address, with the OS-assigned port when `0` was requested.
    Tcp(SocketAddr),
}

impl Display for BoundAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// Byte stream of an accepted connection, whatever the transport.
pub trait ConnectionStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ConnectionStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed accepted connection.
pub type BoxedStream = Box<dyn ConnectionStream>;

/// Bound listening socket.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Accept the next connection, returning it with a peer label for logs.
    pub(crate) async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "unix".to_owned()))
            }
        }
    }
}

/// Bind `endpoint`, returning the listener and the address it ended up on.
///
/// # Errors
///
/// Returns `AppError::AddressInUse` when another live listener owns the
/// address and `AppError::Transport` for any other bind failure.
pub(crate) async fn bind(endpoint: &Endpoint) -> Result<(Listener, BoundAddress)> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let listener = TcpListener::bind((host.as_str(), *port))
                .await
                .map_err(|err| bind_error(endpoint, &err))?;
            let addr = listener.local_addr().map_err(|err| {
                AppError::Transport(format!("failed to read local address: {err}"))
            })?;
            Ok((Listener::Tcp(listener), BoundAddress::Tcp(addr)))
        }
        Endpoint::Unix(path) => bind_path(path).await,
    }
}

fn bind_error(endpoint: &Endpoint, err: &io::Error) -> AppError {
    if err.kind() == io::ErrorKind::AddrInUse {
        AppError::AddressInUse(endpoint.to_string())
    } else {
        AppError::Transport(format!("failed to bind {endpoint}: {err}"))
    }
}

#[cfg(unix)]
async fn bind_path(path: &Path) -> Result<(Listener, BoundAddress)> {
    use std::os::unix::fs::FileTypeExt;

    if let Ok(metadata) = tokio::fs::symlink_metadata(path).await {
        if !metadata.file_type().is_socket() {
            return Err(AppError::Transport(format!(
                "{} exists and is not a socket",
                path.display()
            )));
        }
        match UnixStream::connect(path).await {
            Ok(_stream) => return Err(AppError::AddressInUse(path.display().to_string())),
            Err(err)
                if err.kind() == io::ErrorKind::ConnectionRefused
                    || err.kind() == io::ErrorKind::NotFound =>
            {
                tokio::fs::remove_file(path).await.map_err(|err| {
                    AppError::Transport(format!(
                        "failed to remove stale socket {}: {err}",
                        path.display()
                    ))
                })?;
                info!(path = %path.display(), "removed stale unix socket");
            }
            Err(err) => {
                return Err(AppError::Transport(format!(
                    "failed to probe existing socket {}: {err}",
                    path.display()
                )));
            }
        }
    }

    let listener =
        UnixListener::bind(path).map_err(|err| bind_error(&Endpoint::unix(path), &err))?;
    Ok((Listener::Unix(listener), BoundAddress::Unix(path.to_path_buf())))
}

#[cfg(not(unix))]
async fn bind_path(path: &Path) -> Result<(Listener, BoundAddress)> {
    Err(AppError::Transport(format!(
        "unix sockets are unsupported on this platform: {}",
        path.display()
    )))
}

/// Remove the socket file left behind by a Unix listener.
pub(crate) fn cleanup(address: &BoundAddress) {
    let BoundAddress::Unix(path) = address else {
        return;
    };
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(%err, path = %path.display(), "failed to remove unix socket file");
        }
    }
}

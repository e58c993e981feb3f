//! Transport selection: one listening endpoint per process.
//!
//! On Unix the control API listens on a domain socket at a well-known path;
//! everywhere else it binds TCP on a loopback address. The choice is made
//! once, from platform capability and the configured mode, and is a closed
//! enumeration from then on.

use std::fmt;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use vpnht_config::{TransportConfig, TransportMode};

use crate::outcome::BestEffort;

/// Errors from preparing the listening endpoint. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("domain sockets are not available on this platform")]
    Unsupported,

    #[error("invalid loopback address {addr:?}")]
    InvalidAddress { addr: String },

    #[error("failed to remove stale socket {path}: {source}")]
    RemoveStale {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to bind control endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("failed to create socket directory {path}: {source}")]
    SocketDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to set permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The transport chosen for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Filesystem socket; `mode` is applied after bind.
    DomainSocket { path: PathBuf, mode: u32 },
    /// TCP bound to a loopback address.
    LoopbackTcp { addr: SocketAddr },
}

impl TransportKind {
    /// Pick the transport for this platform and configuration.
    pub fn select(config: &TransportConfig) -> Result<Self, TransportError> {
        let socket = || Self::DomainSocket {
            path: PathBuf::from(&config.socket_path),
            mode: config.socket_mode,
        };

        match config.mode {
            TransportMode::Auto if cfg!(unix) => Ok(socket()),
            TransportMode::Unix if cfg!(unix) => Ok(socket()),
            TransportMode::Unix => Err(TransportError::Unsupported),
            TransportMode::Auto | TransportMode::Tcp => {
                let ip: IpAddr =
                    config
                        .tcp_addr
                        .parse()
                        .map_err(|_| TransportError::InvalidAddress {
                            addr: config.tcp_addr.clone(),
                        })?;
                if !ip.is_loopback() {
                    return Err(TransportError::InvalidAddress {
                        addr: config.tcp_addr.clone(),
                    });
                }
                Ok(Self::LoopbackTcp {
                    addr: SocketAddr::new(ip, config.tcp_port),
                })
            }
        }
    }
}

/// Where the endpoint ended up after binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    DomainSocket(PathBuf),
    LoopbackTcp(SocketAddr),
}

impl From<&TransportKind> for BoundAddress {
    /// The configured address. A TCP port of `0` only becomes concrete after bind.
    fn from(kind: &TransportKind) -> Self {
        match kind {
            TransportKind::DomainSocket { path, .. } => Self::DomainSocket(path.clone()),
            TransportKind::LoopbackTcp { addr } => Self::LoopbackTcp(*addr),
        }
    }
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DomainSocket(path) => write!(f, "unix:{}", path.display()),
            Self::LoopbackTcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// A bound listener, handed to the request server.
#[derive(Debug)]
pub enum Listener {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// An accepted connection.
#[derive(Debug)]
pub enum Stream {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Listener {
    pub async fn accept(&self) -> std::io::Result<Stream> {
        match self {
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Stream::Unix(stream))
            }
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(peer = %peer, "Accepted TCP connection");
                Ok(Stream::Tcp(stream))
            }
        }
    }
}

/// The endpoint's filesystem footprint, owned by the orchestrator.
///
/// The listener itself moves into the request server; this handle stays
/// behind so the socket file can be removed after the server is gone.
#[derive(Debug)]
pub struct Endpoint {
    address: BoundAddress,
}

impl Endpoint {
    pub fn address(&self) -> &BoundAddress {
        &self.address
    }

    /// Unlink the domain socket file. No-op for TCP.
    pub fn remove_artifact(&self) -> BestEffort {
        match &self.address {
            BoundAddress::DomainSocket(path) => match std::fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed control socket");
                    BestEffort::Done
                }
                Err(e) if e.kind() == ErrorKind::NotFound => BestEffort::Done,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove control socket");
                    BestEffort::recovered(format!("remove {}: {e}", path.display()))
                }
            },
            BoundAddress::LoopbackTcp(_) => BestEffort::Done,
        }
    }
}

/// Bind the chosen transport.
///
/// For domain sockets, a leftover file at the path is removed first and the
/// new socket's permissions are relaxed to `mode` so unprivileged session
/// processes can connect.
pub async fn prepare(kind: &TransportKind) -> Result<(Listener, Endpoint), TransportError> {
    match kind {
        TransportKind::DomainSocket { path, mode } => bind_socket(path, *mode),
        TransportKind::LoopbackTcp { addr } => {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| TransportError::Bind {
                    endpoint: format!("tcp:{addr}"),
                    source,
                })?;
            let local = listener.local_addr().map_err(|source| TransportError::Bind {
                endpoint: format!("tcp:{addr}"),
                source,
            })?;
            info!(address = %local, "Control API bound to loopback TCP");
            Ok((
                Listener::Tcp(listener),
                Endpoint {
                    address: BoundAddress::LoopbackTcp(local),
                },
            ))
        }
    }
}

#[cfg(unix)]
fn bind_socket(path: &Path, mode: u32) -> Result<(Listener, Endpoint), TransportError> {
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;

    remove_stale(path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| TransportError::SocketDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let listener = UnixListener::bind(path).map_err(|source| TransportError::Bind {
        endpoint: format!("unix:{}", path.display()),
        source,
    })?;

    if let Err(source) = fs::set_permissions(path, Permissions::from_mode(mode)) {
        drop(listener);
        fs::remove_file(path).ok();
        return Err(TransportError::Permissions {
            path: path.to_path_buf(),
            source,
        });
    }

    info!(
        path = %path.display(),
        mode = %format!("{mode:#o}"),
        "Control API bound to domain socket"
    );
    Ok((
        Listener::Unix(listener),
        Endpoint {
            address: BoundAddress::DomainSocket(path.to_path_buf()),
        },
    ))
}

#[cfg(not(unix))]
fn bind_socket(_path: &Path, _mode: u32) -> Result<(Listener, Endpoint), TransportError> {
    Err(TransportError::Unsupported)
}

/// Remove a leftover artifact. A missing file is fine.
#[cfg(unix)]
fn remove_stale(path: &Path) -> Result<(), TransportError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), "Removed stale control socket");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TransportError::RemoveStale {
            path: path.to_path_buf(),
            source,
        }),
    }
}

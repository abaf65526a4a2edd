//! Accept loop for the session server.

use std::fs;
use std::io;
use std::net::TcpListener;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};

use super::connection::{serve_connection, SharedRegistry};
use crate::endpoint::{Endpoint, Stream};

/// How long the accept loop sleeps when no client is waiting.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A bound server socket.
pub enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    /// Bind `endpoint`. A stale Unix socket is replaced; a live one is an error.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let listener = match endpoint {
            Endpoint::Unix(path) => {
                if path.exists() {
                    if UnixStream::connect(path).is_ok() {
                        bail!("A server is already running on {}", path.display());
                    }
                    fs::remove_file(path).with_context(|| {
                        format!("Failed to remove stale socket: {}", path.display())
                    })?;
                }
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("Failed to bind socket: {}", path.display()))?;
                Listener::Unix {
                    listener,
                    path: path.clone(),
                }
            }
            Endpoint::Tcp(addr) => Listener::Tcp(
                TcpListener::bind(addr.as_str())
                    .with_context(|| format!("Failed to bind {}", addr))?,
            ),
        };
        listener
            .set_nonblocking(true)
            .context("Failed to set non-blocking")?;
        Ok(listener)
    }

    /// The endpoint clients should connect to.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Listener::Unix { path, .. } => Ok(Endpoint::Unix(path.clone())),
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
        }
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Listener::Unix { listener, .. } => listener.set_nonblocking(nonblocking),
            Listener::Tcp(listener) => listener.set_nonblocking(nonblocking),
        }
    }

    /// Accept one pending connection, if any.
    fn try_accept(&self) -> io::Result<Option<Stream>> {
        let accepted = match self {
            Listener::Unix { listener, .. } => listener.accept().map(|(s, _)| Stream::Unix(s)),
            Listener::Tcp(listener) => listener.accept().map(|(s, _)| {
                let _ = s.set_nodelay(true);
                Stream::Tcp(s)
            }),
        };
        match accepted {
            Ok(stream) => {
                // Connections block even though the listener does not.
                match &stream {
                    Stream::Unix(s) => s.set_nonblocking(false)?,
                    Stream::Tcp(s) => s.set_nonblocking(false)?,
                }
                Ok(Some(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serve connections until `shutdown` is set, one thread per client.
    pub fn serve(&self, registry: &SharedRegistry, shutdown: &AtomicBool) -> Result<()> {
        let next_id = AtomicU64::new(1);
        match self.local_endpoint() {
            Ok(endpoint) => info!(%endpoint, "terminal server listening"),
            Err(e) => warn!(error = %e, "terminal server listening on unknown address"),
        }

        while !shutdown.load(Ordering::SeqCst) {
            match self.try_accept() {
                Ok(Some(stream)) => {
                    let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
                    let registry = Arc::clone(registry);
                    debug!(conn_id, "accepted connection");
                    let spawned = thread::Builder::new()
                        .name(format!("conn-{}", conn_id))
                        .spawn(move || {
                            if let Err(e) = serve_connection(conn_id, stream, &registry) {
                                warn!(conn_id, error = %format_args!("{:#}", e), "client error");
                            }
                        });
                    if let Err(e) = spawned {
                        error!(error = %e, "failed to spawn connection thread");
                    }
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(e) => {
                    error!(error = %e, "accept error");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }

        info!("terminal server stopped");
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            fs::remove_file(path).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = Listener::bind(&Endpoint::Unix(path.clone())).unwrap();
        assert_eq!(listener.local_endpoint().unwrap(), Endpoint::Unix(path));
    }

    #[test]
    fn live_socket_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::Unix(dir.path().join("live.sock"));
        let _first = Listener::bind(&endpoint).unwrap();
        assert!(Listener::bind(&endpoint).is_err());
    }

    #[test]
    fn socket_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        drop(Listener::bind(&Endpoint::Unix(path.clone())).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn tcp_binds_ephemeral_port() {
        let listener = Listener::bind(&Endpoint::Tcp("127.0.0.1:0".to_string())).unwrap();
        match listener.local_endpoint().unwrap() {
            Endpoint::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn accept_without_client_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let listener = Listener::bind(&Endpoint::Unix(dir.path().join("idle.sock"))).unwrap();
        assert!(listener.try_accept().unwrap().is_none());
    }
}

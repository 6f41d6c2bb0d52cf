//! Listening Sockets
//!
//! The daemon listens on at most one socket: TCP on `host:port`, or a Unix
//! domain socket on a filesystem path. Every accepted stream becomes a
//! [`ClientConnection`].
//!
//! A Unix listener owns its socket file. The file is only removed by
//! [`Listener::close`], which reports a failure to unlink; binding over an
//! existing path fails rather than removing someone else's socket.

use crate::connection::ClientConnection;
use futures::FutureExt;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::net::{lookup_host, TcpListener, TcpSocket, UnixListener};
use tracing::debug;

/// Where to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindTarget {
    /// `host:port`, resolved at bind time.
    Tcp(String),
    /// Path of a Unix domain socket.
    Unix(PathBuf),
}

impl BindTarget {
    /// Prefix selecting a Unix socket path in the textual form.
    pub const UNIX_PREFIX: &'static str = "unix:";
}

impl FromStr for BindTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.strip_prefix(Self::UNIX_PREFIX) {
            Some("") => Err("unix socket path is empty".to_string()),
            Some(path) => Ok(BindTarget::Unix(PathBuf::from(path))),
            None if value.is_empty() => Err("bind address is empty".to_string()),
            None if !value.contains(':') => Err(format!("{}: expected host:port", value)),
            None => Ok(BindTarget::Tcp(value.to_string())),
        }
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindTarget::Tcp(addr) => f.write_str(addr),
            BindTarget::Unix(path) => write!(f, "{}{}", Self::UNIX_PREFIX, path.display()),
        }
    }
}

/// A bound, listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Binds `target`. TCP sockets get a listen backlog of `backlog`.
    pub async fn bind(target: &BindTarget, backlog: u32) -> io::Result<Self> {
        match target {
            BindTarget::Tcp(addr) => {
                let mut last_err = None;
                for candidate in lookup_host(addr.as_str()).await? {
                    match bind_tcp(candidate, backlog) {
                        Ok(listener) => return Ok(Listener::Tcp(listener)),
                        Err(e) => {
                            debug!(addr = %candidate, error = %e, "Bind attempt failed");
                            last_err = Some(e);
                        }
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{}: no addresses to bind", addr),
                    )
                }))
            }
            BindTarget::Unix(path) => Ok(Listener::Unix {
                listener: UnixListener::bind(path)?,
                path: path.clone(),
            }),
        }
    }

    /// Polls for one pending connection.
    pub fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<ClientConnection>> {
        match self {
            Listener::Tcp(listener) => listener
                .poll_accept(cx)
                .map_ok(|(stream, addr)| ClientConnection::from_tcp(stream, addr)),
            Listener::Unix { listener, .. } => listener
                .poll_accept(cx)
                .map_ok(|(stream, _)| ClientConnection::from_unix(stream)),
        }
    }

    /// Accepts a connection only if one is already pending.
    pub fn try_accept(&self) -> Option<io::Result<ClientConnection>> {
        std::future::poll_fn(|cx| self.poll_accept(cx)).now_or_never()
    }

    /// Bound address of a TCP listener; `None` for Unix sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix { .. } => None,
        }
    }

    /// Closes the socket, removing the socket file of a Unix listener.
    pub fn close(self) -> io::Result<()> {
        match self {
            Listener::Tcp(_) => Ok(()),
            Listener::Unix { listener, path } => {
                drop(listener);
                std::fs::remove_file(&path)?;
                debug!(path = %path.display(), "Removed socket file");
                Ok(())
            }
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => write!(f, "{}", addr),
                Err(_) => f.write_str("tcp"),
            },
            Listener::Unix { path, .. } => {
                write!(f, "{}{}", BindTarget::UNIX_PREFIX, path.display())
            }
        }
    }
}

fn bind_tcp(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpStream, UnixStream};

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            "127.0.0.1:7000".parse::<BindTarget>(),
            Ok(BindTarget::Tcp("127.0.0.1:7000".to_string()))
        );
        assert_eq!(
            "unix:/run/numeraria.sock".parse::<BindTarget>(),
            Ok(BindTarget::Unix(PathBuf::from("/run/numeraria.sock")))
        );
        assert!("unix:".parse::<BindTarget>().is_err());
        assert!("".parse::<BindTarget>().is_err());
        assert!("localhost".parse::<BindTarget>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["localhost:9000", "unix:/tmp/n.sock"] {
            let target: BindTarget = text.parse().unwrap();
            assert_eq!(target.to_string(), text);
        }
    }

    #[tokio::test]
    async fn test_tcp_accept() {
        let target = BindTarget::Tcp("127.0.0.1:0".to_string());
        let listener = Listener::bind(&target, 4).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(listener.try_accept().is_none());

        let _client = TcpStream::connect(addr).await.unwrap();
        let conn = std::future::poll_fn(|cx| listener.poll_accept(cx))
            .await
            .unwrap();
        assert!(matches!(conn.origin(), crate::connection::Origin::Tcp(_)));
    }

    #[tokio::test]
    async fn test_unix_close_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numeraria.sock");
        let listener = Listener::bind(&BindTarget::Unix(path.clone()), 4)
            .await
            .unwrap();
        assert!(path.exists());

        let _client = UnixStream::connect(&path).await.unwrap();
        listener.close().unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_unix_bind_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.sock");
        std::fs::write(&path, b"").unwrap();
        assert!(Listener::bind(&BindTarget::Unix(path.clone()), 4)
            .await
            .is_err());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_close_reports_missing_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.sock");
        let listener = Listener::bind(&BindTarget::Unix(path.clone()), 4)
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(listener.close().is_err());
    }
}

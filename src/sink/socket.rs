//! Socket mirror
//!
//! Lets other programs share the serial line: every byte received from the
//! device is copied to all connected clients, and bytes sent by clients are
//! forwarded to the device one at a time.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener, TcpStream};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Maximum number of simultaneously connected clients
pub const MAX_CLIENTS: usize = 16;

/// Where the mirror listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    /// `unix:<path>`
    Unix(PathBuf),
    /// `inet:<port>`, any IPv4 address
    Inet(u16),
    /// `inet6:<port>`, any IPv6 address
    Inet6(u16),
}

impl FromStr for SocketAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSocket(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        match kind {
            "unix" if !rest.is_empty() => Ok(SocketAddress::Unix(PathBuf::from(rest))),
            "inet" => rest.parse().map(SocketAddress::Inet).map_err(|_| invalid()),
            "inet6" => rest.parse().map(SocketAddress::Inet6).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketAddress::Unix(path) => write!(f, "unix:{}", path.display()),
            SocketAddress::Inet(port) => write!(f, "inet:{port}"),
            SocketAddress::Inet6(port) => write!(f, "inet6:{port}"),
        }
    }
}

enum Listener {
    Unix(UnixListener, PathBuf),
    Tcp(TcpListener),
}

enum Client {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Client {
    fn fd(&self) -> BorrowedFd<'_> {
        match self {
            Client::Unix(s) => s.as_fd(),
            Client::Tcp(s) => s.as_fd(),
        }
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = 0u8;
        let n = match self {
            Client::Unix(s) => s.read(std::slice::from_mut(&mut byte))?,
            Client::Tcp(s) => s.read(std::slice::from_mut(&mut byte))?,
        };
        Ok((n == 1).then_some(byte))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        match self {
            Client::Unix(s) => s.write_all(&[byte]),
            Client::Tcp(s) => s.write_all(&[byte]),
        }
    }
}

/// Listening socket plus its connected clients
pub struct SocketMirror {
    listener: Listener,
    clients: Vec<Client>,
}

impl SocketMirror {
    /// Start listening on `address`
    ///
    /// A stale Unix socket file at the same path is removed first.
    pub fn bind(address: &SocketAddress) -> io::Result<Self> {
        let listener = match address {
            SocketAddress::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                listener.set_nonblocking(true)?;
                Listener::Unix(listener, path.clone())
            },
            SocketAddress::Inet(port) => {
                let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, *port))?;
                listener.set_nonblocking(true)?;
                Listener::Tcp(listener)
            },
            SocketAddress::Inet6(port) => {
                let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, *port))?;
                listener.set_nonblocking(true)?;
                Listener::Tcp(listener)
            },
        };
        tracing::info!("Listening on socket {}", address);

        Ok(Self {
            listener,
            clients: Vec::new(),
        })
    }

    /// Port of a TCP listener
    pub fn port(&self) -> Option<u16> {
        match &self.listener {
            Listener::Tcp(l) => l.local_addr().ok().map(|a| a.port()),
            Listener::Unix(..) => None,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Descriptors to watch for readability: the listener, then each client
    pub fn fds(&self) -> Vec<BorrowedFd<'_>> {
        let listener = match &self.listener {
            Listener::Unix(l, _) => l.as_fd(),
            Listener::Tcp(l) => l.as_fd(),
        };
        std::iter::once(listener)
            .chain(self.clients.iter().map(Client::fd))
            .collect()
    }

    /// Handle readiness reported for the descriptors returned by `fds`
    ///
    /// Returns at most one byte received from a client. Clients that hang up
    /// are dropped and pending connections are accepted.
    pub fn service(&mut self, ready: &[bool]) -> Option<u8> {
        let mut received = None;
        let mut closed = Vec::new();

        for (i, client) in self.clients.iter_mut().enumerate() {
            if !ready.get(i + 1).copied().unwrap_or(false) {
                continue;
            }
            match client.read_byte() {
                Ok(Some(byte)) => {
                    received = Some(byte);
                    break;
                },
                Ok(None) => closed.push(i),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
                Err(e) => {
                    tracing::debug!("Socket client read failed: {}", e);
                    closed.push(i);
                },
            }
        }

        for i in closed.into_iter().rev() {
            self.clients.remove(i);
            tracing::info!("Socket client disconnected");
        }

        if ready.first().copied().unwrap_or(false) {
            self.accept_pending();
        }

        received
    }

    /// Copy a device byte to every client
    pub fn write(&mut self, byte: u8) {
        self.clients.retain_mut(|client| match client.write_byte(byte) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!("Socket client is not keeping up, byte dropped");
                true
            },
            Err(e) => {
                tracing::info!("Dropping socket client: {}", e);
                false
            },
        });
    }

    fn accept_pending(&mut self) {
        loop {
            let accepted = match &self.listener {
                Listener::Unix(l, _) => l.accept().and_then(|(s, _)| {
                    s.set_nonblocking(true)?;
                    Ok(Client::Unix(s))
                }),
                Listener::Tcp(l) => l.accept().and_then(|(s, _)| {
                    s.set_nonblocking(true)?;
                    Ok(Client::Tcp(s))
                }),
            };

            match accepted {
                Ok(client) if self.clients.len() < MAX_CLIENTS => {
                    tracing::info!("Socket client connected");
                    self.clients.push(client);
                },
                Ok(_) => tracing::warn!("Socket client limit reached, connection refused"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!("Socket accept failed: {}", e);
                    break;
                },
            }
        }
    }
}

impl Drop for SocketMirror {
    fn drop(&mut self) {
        if let Listener::Unix(_, path) = &self.listener {
            let _ = std::fs::remove_file(path);
        }
    }
}

//! Rendezvous with the external debugging daemon.
//!
//! The coordinator only sees [`DaemonClient`] and [`DaemonSession`]. A
//! session is live while its pollable descriptor stays open; every
//! debugger the daemon accepts for this process arrives through
//! [`DaemonSession::accept_connection`].
//!
//! [`UnixDaemonClient`] is the stock implementation: a `SOCK_SEQPACKET`
//! connection on which the process announces itself with one JSON
//! record and then receives each debugger connection as a record
//! carrying one `SCM_RIGHTS` descriptor.

use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, UnixAddr, connect, socket};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AdbConnError;
use crate::sync::retry_eintr;
use crate::transfer::{recv_with_fds, send_with_fds};

// ── ClientInfo ───────────────────────────────────────────────────

/// What the process tells the daemon about itself on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub pid: u32,
    pub debuggable: bool,
    pub profileable: bool,
    pub architecture: String,
}

impl ClientInfo {
    /// Metadata for the current process.
    pub fn current(debuggable: bool, profileable: bool) -> Self {
        Self {
            pid: std::process::id(),
            debuggable,
            profileable,
            architecture: std::env::consts::ARCH.to_string(),
        }
    }
}

// ── Contracts ────────────────────────────────────────────────────

pub trait DaemonSession: Send {
    /// Readable when a connection is waiting; hangs up when the daemon goes away.
    fn pollable_fd(&self) -> BorrowedFd<'_>;

    /// Take the next accepted debugger connection.
    ///
    /// An error means the session is unusable and must be replaced.
    fn accept_connection(&mut self) -> Result<OwnedFd, AdbConnError>;
}

pub trait DaemonClient: Send + Sync {
    /// Attempt one rendezvous. Must not block waiting for the daemon to appear.
    fn connect(&self, info: &ClientInfo) -> Result<Box<dyn DaemonSession>, AdbConnError>;
}

// ── UnixDaemonClient ─────────────────────────────────────────────

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddress {
    Path(PathBuf),
    /// Linux abstract namespace, written `@name`.
    Abstract(String),
}

impl DaemonAddress {
    pub fn parse(address: &str) -> Self {
        match address.strip_prefix('@') {
            Some(name) => DaemonAddress::Abstract(name.to_string()),
            None => DaemonAddress::Path(PathBuf::from(address)),
        }
    }

    fn to_unix_addr(&self) -> Result<UnixAddr, AdbConnError> {
        let addr = match self {
            DaemonAddress::Path(path) => UnixAddr::new(path)?,
            DaemonAddress::Abstract(name) => UnixAddr::new_abstract(name.as_bytes())?,
        };
        Ok(addr)
    }
}

impl fmt::Display for DaemonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonAddress::Path(path) => write!(f, "{}", path.display()),
            DaemonAddress::Abstract(name) => write!(f, "@{name}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnixDaemonClient {
    address: DaemonAddress,
}

impl UnixDaemonClient {
    pub fn new(address: DaemonAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> &DaemonAddress {
        &self.address
    }
}

impl DaemonClient for UnixDaemonClient {
    fn connect(&self, info: &ClientInfo) -> Result<Box<dyn DaemonSession>, AdbConnError> {
        let addr = self.address.to_unix_addr()?;
        let sock = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        retry_eintr(|| connect(sock.as_raw_fd(), &addr))
            .map_err(|e| AdbConnError::DaemonUnavailable(format!("{}: {e}", self.address)))?;

        let hello = serde_json::to_vec(info)?;
        send_with_fds(sock.as_fd(), &hello, &[])?;
        debug!(address = %self.address, pid = info.pid, "registered with daemon");
        Ok(Box::new(UnixDaemonSession::new(sock)))
    }
}

/// A registered connection to the daemon.
#[derive(Debug)]
pub struct UnixDaemonSession {
    socket: OwnedFd,
}

impl UnixDaemonSession {
    pub fn new(socket: OwnedFd) -> Self {
        Self { socket }
    }
}

impl DaemonSession for UnixDaemonSession {
    fn pollable_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }

    fn accept_connection(&mut self) -> Result<OwnedFd, AdbConnError> {
        let mut buf = [0u8; 16];
        let (n, fds) = recv_with_fds(self.socket.as_fd(), &mut buf, 1)?;
        match fds.into_iter().next() {
            Some(fd) => Ok(fd),
            None => {
                debug!(bytes = n, "daemon record carried no descriptor");
                Err(AdbConnError::SessionLost)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::FromRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nix::sys::socket::{Backlog, accept, bind, listen, socketpair};

    fn seqpacket_pair() -> (OwnedFd, OwnedFd) {
        socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .unwrap()
    }

    fn unique_abstract_name() -> String {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "adbconn-session-test-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        )
    }

    #[test]
    fn address_parsing() {
        assert_eq!(
            DaemonAddress::parse("@jdwp-control"),
            DaemonAddress::Abstract("jdwp-control".into())
        );
        assert_eq!(
            DaemonAddress::parse("/run/jdwp.sock"),
            DaemonAddress::Path("/run/jdwp.sock".into())
        );
        assert_eq!(DaemonAddress::parse("@x").to_string(), "@x");
    }

    #[test]
    fn connect_fails_fast_without_daemon() {
        let client = UnixDaemonClient::new(DaemonAddress::Abstract(unique_abstract_name()));
        let err = client
            .connect(&ClientInfo::current(true, false))
            .err()
            .unwrap();
        assert!(matches!(err, AdbConnError::DaemonUnavailable(_)));
    }

    #[test]
    fn connect_announces_client_info() {
        let name = unique_abstract_name();
        let listener = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .unwrap();
        bind(
            listener.as_raw_fd(),
            &UnixAddr::new_abstract(name.as_bytes()).unwrap(),
        )
        .unwrap();
        listen(&listener, Backlog::MAXCONN).unwrap();

        let client = UnixDaemonClient::new(DaemonAddress::Abstract(name));
        let info = ClientInfo::current(true, true);
        let _session = client.connect(&info).unwrap();

        let raw = accept(listener.as_raw_fd()).unwrap();
        // SAFETY: accept returned a fresh descriptor we now own.
        let daemon_side = unsafe { OwnedFd::from_raw_fd(raw) };
        let mut buf = [0u8; 512];
        let (n, _) = recv_with_fds(daemon_side.as_fd(), &mut buf, 1).unwrap();
        let announced: ClientInfo = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(announced, info);
    }

    #[test]
    fn accept_returns_passed_descriptor() {
        let (daemon_side, process_side) = seqpacket_pair();
        let mut session = UnixDaemonSession::new(process_side);

        let (mut debugger, ours) = UnixStream::pair().unwrap();
        send_with_fds(daemon_side.as_fd(), b"+", &[ours.as_fd()]).unwrap();
        drop(ours);

        let fd = session.accept_connection().unwrap();
        let mut conn = UnixStream::from(fd);
        debugger.write_all(b"hi").unwrap();
        let mut got = [0u8; 2];
        conn.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"hi");
    }

    #[test]
    fn accept_fails_when_daemon_hangs_up() {
        let (daemon_side, process_side) = seqpacket_pair();
        let mut session = UnixDaemonSession::new(process_side);
        drop(daemon_side);
        assert!(matches!(
            session.accept_connection(),
            Err(AdbConnError::SessionLost)
        ));
    }
}

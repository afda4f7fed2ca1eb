use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

use vortex_common::error::DiscoveryError;

/// What a single bounded connect attempt observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The handshake completed. The connection is closed right away.
    Open,
    /// The peer answered with a reset, so something is listening at that address.
    Refused,
    /// Nothing answered within the timeout.
    TimedOut,
    /// The local stack reported the host or network as unreachable.
    Unreachable,
    /// Any other I/O failure.
    Failed(String),
}

/// The local socket layer ran out of resources. Probing more addresses cannot help.
#[derive(Debug, Clone, Error)]
#[error("socket resources exhausted: {0}")]
pub struct ResourceExhausted(pub String);

impl From<ResourceExhausted> for DiscoveryError {
    fn from(err: ResourceExhausted) -> Self {
        DiscoveryError::pool_fatal(err.to_string())
    }
}

/// Opens TCP connections on behalf of a probe.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempts a handshake and closes it immediately, without exchanging data.
    async fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<ConnectOutcome, ResourceExhausted>;

    /// Connects and reads whatever the service volunteers, up to `max_bytes`.
    ///
    /// `timeout` bounds connect and read together. Silence until the deadline is not an
    /// error: the returned buffer is simply empty.
    async fn read_banner(
        &self,
        addr: SocketAddr,
        timeout: Duration,
        max_bytes: usize,
    ) -> io::Result<Vec<u8>>;
}

/// [`Connector`] backed by tokio's TCP stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        probe_timeout: Duration,
    ) -> Result<ConnectOutcome, ResourceExhausted> {
        match timeout(probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(ConnectOutcome::Open)
            }
            Ok(Err(e)) if is_resource_exhaustion(&e) => Err(ResourceExhausted(e.to_string())),
            Ok(Err(e)) => Ok(classify_connect_error(&e)),
            Err(_elapsed) => Ok(ConnectOutcome::TimedOut),
        }
    }

    async fn read_banner(
        &self,
        addr: SocketAddr,
        budget: Duration,
        max_bytes: usize,
    ) -> io::Result<Vec<u8>> {
        let deadline: Instant = Instant::now() + budget;
        let mut stream: TcpStream = timeout_at(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::from(ErrorKind::TimedOut))??;

        let mut buffer: Vec<u8> = vec![0u8; max_bytes];
        let mut filled: usize = 0;

        while filled < max_bytes {
            match timeout_at(deadline, stream.read(&mut buffer[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) if filled == 0 => return Err(e),
                Ok(Err(_)) => break,
                Err(_elapsed) => break,
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }
}

pub fn classify_connect_error(err: &io::Error) -> ConnectOutcome {
    match err.kind() {
        ErrorKind::ConnectionRefused => ConnectOutcome::Refused,
        ErrorKind::TimedOut => ConnectOutcome::TimedOut,
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => ConnectOutcome::Unreachable,
        _ => ConnectOutcome::Failed(err.to_string()),
    }
}

// ENOMEM, ENFILE, EMFILE, ENOBUFS
#[cfg(target_os = "linux")]
const EXHAUSTION_CODES: &[i32] = &[12, 23, 24, 105];
#[cfg(target_os = "macos")]
const EXHAUSTION_CODES: &[i32] = &[12, 23, 24, 55];
// WSAEMFILE, WSAENOBUFS
#[cfg(windows)]
const EXHAUSTION_CODES: &[i32] = &[10024, 10055];
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
const EXHAUSTION_CODES: &[i32] = &[];

/// Whether `err` means the process cannot open more sockets.
pub fn is_resource_exhaustion(err: &io::Error) -> bool {
    err.kind() == ErrorKind::OutOfMemory
        || err
            .raw_os_error()
            .is_some_and(|code| EXHAUSTION_CODES.contains(&code))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use async_trait::async_trait;
use tokio::net::UdpSocket;

use vortex_common::debug;
use vortex_protocols::dns;

const DNS_PORT: u16 = 53;
const RESOLV_CONF: &str = "/etc/resolv.conf";
const MAX_DATAGRAM: usize = 1500;

/// Best-effort reverse lookups. `Ok(None)` means the address simply has no name.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn reverse_lookup(&self, addr: IpAddr) -> anyhow::Result<Option<String>>;
}

/// Resolver used when lookups are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl HostnameResolver for NoopResolver {
    async fn reverse_lookup(&self, _addr: IpAddr) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Sends PTR queries straight to a recursive DNS server over UDP.
///
/// Callers are expected to bound [`HostnameResolver::reverse_lookup`] with a timeout;
/// the resolver itself waits until a matching answer arrives.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    server: SocketAddr,
}

impl DnsResolver {
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }

    /// Uses the first `nameserver` of `/etc/resolv.conf`, or a public resolver if none is found.
    pub fn from_system() -> Self {
        let server = std::fs::read_to_string(RESOLV_CONF)
            .ok()
            .and_then(|contents| first_nameserver(&contents))
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)));
        debug!("using {server} for reverse lookups");
        Self::new(SocketAddr::new(server, DNS_PORT))
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

#[async_trait]
impl HostnameResolver for DnsResolver {
    async fn reverse_lookup(&self, addr: IpAddr) -> anyhow::Result<Option<String>> {
        let bind_addr: SocketAddr = match self.server {
            SocketAddr::V4(_) => "0.0.0.0:0".parse()?,
            SocketAddr::V6(_) => "[::]:0".parse()?,
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("binding resolver socket")?;
        socket
            .connect(self.server)
            .await
            .with_context(|| format!("connecting to {}", self.server))?;

        let id: u16 = rand::random::<u16>();
        let query: Vec<u8> = dns::create_ptr_packet(&addr, id)?;
        socket.send(&query).await.context("sending PTR query")?;

        let mut buffer = [0u8; MAX_DATAGRAM];
        loop {
            let len: usize = socket.recv(&mut buffer).await.context("receiving PTR answer")?;
            match read_answer(&buffer[..len], id) {
                Answer::Named(hostname) => return Ok(Some(hostname)),
                Answer::Unnamed(e) => {
                    debug!("no name for {addr}: {e}");
                    return Ok(None);
                }
                Answer::Foreign => {
                    debug!("ignoring a {len} byte datagram while waiting for DNS answer {id}");
                }
            }
        }
    }
}

enum Answer {
    Named(String),
    Unnamed(anyhow::Error),
    /// Belongs to some other transaction, or is too short to carry an id.
    Foreign,
}

/// The transaction id is checked before the payload is trusted to say anything about our lookup.
fn read_answer(payload: &[u8], id: u16) -> Answer {
    match payload {
        [hi, lo, ..] if u16::from_be_bytes([*hi, *lo]) == id => {}
        _ => return Answer::Foreign,
    }
    match dns::get_hostname(payload) {
        Ok((_, hostname)) => Answer::Named(hostname),
        Err(e) => Answer::Unnamed(e),
    }
}

fn first_nameserver(resolv_conf: &str) -> Option<IpAddr> {
    resolv_conf
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| line.strip_prefix("nameserver"))
        .filter_map(|rest| {
            // Drop an IPv6 zone suffix such as `%eth0`.
            let candidate = rest.trim().split('%').next().unwrap_or_default();
            candidate.parse::<IpAddr>().ok()
        })
        .next()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

//! In-memory network used by the unit tests.

use std::collections::{BTreeSet, HashMap};
use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::resolver::HostnameResolver;
use super::tcp::{ConnectOutcome, Connector, ResourceExhausted};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Connect,
    Banner,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct HostScript {
    pub open: BTreeSet<u16>,
    /// Ports that swallow SYNs.
    pub filtered: BTreeSet<u16>,
    pub failing: HashMap<u16, String>,
    pub banners: HashMap<u16, Vec<u8>>,
    pub exhausted: bool,
}

impl HostScript {
    pub fn open(ports: &[u16]) -> Self {
        Self {
            open: ports.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn banner(mut self, port: u16, text: &str) -> Self {
        self.banners.insert(port, text.as_bytes().to_vec());
        self
    }

    pub fn filtered(mut self, ports: &[u16]) -> Self {
        self.filtered.extend(ports.iter().copied());
        self
    }

    pub fn failing(mut self, port: u16, message: &str) -> Self {
        self.failing.insert(port, message.to_string());
        self
    }

    pub fn exhausted() -> Self {
        Self {
            exhausted: true,
            ..Self::default()
        }
    }
}

/// Hosts missing from the script never answer.
#[derive(Debug, Default)]
pub(crate) struct ScriptedConnector {
    hosts: HashMap<IpAddr, HostScript>,
    latency: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<(IpAddr, u16, CallKind)>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, addr: &str, script: HostScript) -> Self {
        self.hosts.insert(addr.parse().unwrap(), script);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn peak_connections(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, addr: &str) -> Vec<(u16, CallKind)> {
        let addr: IpAddr = addr.parse().unwrap();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(ip, _, _)| *ip == addr)
            .map(|(_, port, kind)| (*port, *kind))
            .collect()
    }

    fn record(&self, addr: SocketAddr, kind: CallKind) {
        self.calls.lock().unwrap().push((addr.ip(), addr.port(), kind));
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<ConnectOutcome, ResourceExhausted> {
        self.record(addr, CallKind::Connect);
        self.enter();
        let outcome = self.resolve(addr, timeout).await;
        self.leave();
        outcome
    }

    async fn read_banner(
        &self,
        addr: SocketAddr,
        _timeout: Duration,
        max_bytes: usize,
    ) -> io::Result<Vec<u8>> {
        self.record(addr, CallKind::Banner);
        let script = self
            .hosts
            .get(&addr.ip())
            .ok_or_else(|| io::Error::from(ErrorKind::TimedOut))?;
        if !script.open.contains(&addr.port()) {
            return Err(io::Error::from(ErrorKind::ConnectionRefused));
        }
        let mut banner = script.banners.get(&addr.port()).cloned().unwrap_or_default();
        banner.truncate(max_bytes);
        Ok(banner)
    }
}

impl ScriptedConnector {
    async fn resolve(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<ConnectOutcome, ResourceExhausted> {
        let Some(script) = self.hosts.get(&addr.ip()) else {
            tokio::time::sleep(timeout).await;
            return Ok(ConnectOutcome::TimedOut);
        };
        if script.exhausted {
            return Err(ResourceExhausted("too many open files".into()));
        }
        if script.filtered.contains(&addr.port()) {
            tokio::time::sleep(timeout).await;
            return Ok(ConnectOutcome::TimedOut);
        }
        tokio::time::sleep(self.latency).await;
        if let Some(message) = script.failing.get(&addr.port()) {
            return Ok(ConnectOutcome::Failed(message.clone()));
        }
        if script.open.contains(&addr.port()) {
            Ok(ConnectOutcome::Open)
        } else {
            Ok(ConnectOutcome::Refused)
        }
    }
}

/// Answers from a fixed table; unknown addresses fail the lookup.
#[derive(Debug, Default)]
pub(crate) struct TableResolver {
    names: HashMap<IpAddr, String>,
}

impl TableResolver {
    pub fn with(mut self, addr: &str, name: &str) -> Self {
        self.names.insert(addr.parse().unwrap(), name.to_string());
        self
    }
}

#[async_trait]
impl HostnameResolver for TableResolver {
    async fn reverse_lookup(&self, addr: IpAddr) -> anyhow::Result<Option<String>> {
        match self.names.get(&addr) {
            Some(name) => Ok(Some(name.clone())),
            None => anyhow::bail!("NXDOMAIN for {addr}"),
        }
    }
}

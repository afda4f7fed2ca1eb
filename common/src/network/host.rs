use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Outcome of probing a single address.
///
/// Invariants upheld by the constructors and mutators below:
/// * `open_ports` and `filtered_ports` are disjoint.
/// * every key of `banners` is contained in `open_ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    pub address: IpAddr,
    pub alive: bool,
    pub hostname: Option<String>,
    pub open_ports: BTreeSet<u16>,
    /// Ports whose every connect attempt timed out.
    pub filtered_ports: BTreeSet<u16>,
    pub banners: BTreeMap<u16, String>,
    pub probe_duration: Duration,
    pub error: Option<HostError>,
}

impl HostResult {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            alive: false,
            hostname: None,
            open_ports: BTreeSet::new(),
            filtered_ports: BTreeSet::new(),
            banners: BTreeMap::new(),
            probe_duration: Duration::ZERO,
            error: None,
        }
    }

    /// A result for an address that never produced a probe outcome.
    pub fn failed(address: IpAddr, error: HostError) -> Self {
        Self::new(address).with_error(error)
    }

    pub fn with_error(mut self, error: HostError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn mark_open(&mut self, port: u16) {
        self.filtered_ports.remove(&port);
        self.open_ports.insert(port);
    }

    pub fn mark_filtered(&mut self, port: u16) {
        if !self.open_ports.contains(&port) {
            self.filtered_ports.insert(port);
        }
    }

    /// Records a banner. Ignored for ports that are not open.
    pub fn insert_banner(&mut self, port: u16, banner: String) -> bool {
        if !self.open_ports.contains(&port) {
            return false;
        }
        self.banners.insert(port, banner);
        true
    }

    /// Keeps the first error a probe ran into; later ones are usually consequences.
    pub fn record_error(&mut self, error: HostError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn banner(&self, port: u16) -> Option<&str> {
        self.banners.get(&port).map(String::as_str)
    }

    pub fn display_name(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

//! # Sweep Result Model
//!
//! The value a finished sweep hands to its consumers (report generation, analyzers).
//!
//! `host_results` keeps **completion order**, which differs between runs. Consumers
//! that need a stable order should go through [`SweepResult::sorted_by_address`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::network::host::HostResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub total: usize,
    pub alive: usize,
    pub unreachable: usize,
    pub open_ports: usize,
    /// Hosts whose result carries any error.
    pub errors: usize,
    /// Hosts the sweep never finished (deadline or cancellation).
    pub timed_out: usize,
}

impl SweepSummary {
    pub fn from_results(results: &[HostResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };

        for result in results {
            if result.alive {
                summary.alive += 1;
            } else {
                summary.unreachable += 1;
            }
            summary.open_ports += result.open_ports.len();
            match &result.error {
                Some(HostError::SweepTimeout) => {
                    summary.errors += 1;
                    summary.timed_out += 1;
                }
                Some(_) => summary.errors += 1,
                None => {}
            }
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The normalized block that was swept, e.g. `192.168.1.0/24`.
    pub address_space: String,
    pub address_space_size: usize,
    pub host_results: Vec<HostResult>,
    pub summary: SweepSummary,
}

impl SweepResult {
    pub fn assemble(
        started_at: DateTime<Utc>,
        address_space: String,
        address_space_size: usize,
        host_results: Vec<HostResult>,
    ) -> Self {
        let summary = SweepSummary::from_results(&host_results);
        Self {
            started_at,
            finished_at: Utc::now(),
            address_space,
            address_space_size,
            host_results,
            summary,
        }
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn alive_hosts(&self) -> impl Iterator<Item = &HostResult> {
        self.host_results.iter().filter(|host| host.alive)
    }

    pub fn sorted_by_address(&self) -> Vec<&HostResult> {
        let mut sorted: Vec<&HostResult> = self.host_results.iter().collect();
        sorted.sort_by_key(|host| host.address);
        sorted
    }

    pub fn get(&self, address: &std::net::IpAddr) -> Option<&HostResult> {
        self.host_results.iter().find(|host| &host.address == address)
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

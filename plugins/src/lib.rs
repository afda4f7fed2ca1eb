//! # Analyzers
//!
//! Post-processing of sweep results. An [`Analyzer`] looks at one [`HostResult`] and
//! returns zero or more [`Finding`]s; the [`AnalyzerRegistry`] runs every registered
//! analyzer over a whole sweep.
//!
//! Analyzers are registered explicitly, so the set that runs is fixed by the
//! code that builds the registry.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;
use tracing::debug;

use vortex_common::network::host::HostResult;
use vortex_common::network::sweep::SweepResult;

pub mod analyzers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub address: IpAddr,
    /// `None` for host-wide findings.
    pub port: Option<u16>,
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    /// Name of the analyzer that produced it.
    pub source: String,
}

impl Finding {
    pub fn on_port(
        host: &HostResult,
        port: u16,
        severity: Severity,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            address: host.address,
            port: Some(port),
            severity,
            title: title.into(),
            detail: detail.into(),
            source: String::new(),
        }
    }
}

pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, host: &HostResult) -> Vec<Finding>;
}

#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in analyzer.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(analyzers::OpenRdp);
        registry.register(analyzers::CleartextProtocols);
        registry.register(analyzers::VersionDisclosure);
        registry
    }

    pub fn register<A: Analyzer + 'static>(&mut self, analyzer: A) -> &mut Self {
        debug!("registered analyzer {}", analyzer.name());
        self.analyzers.push(Box::new(analyzer));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    pub fn analyze_host(&self, host: &HostResult) -> Vec<Finding> {
        let mut findings = Vec::new();
        for analyzer in &self.analyzers {
            for mut finding in analyzer.analyze(host) {
                finding.source = analyzer.name().to_string();
                findings.push(finding);
            }
        }
        findings
    }

    /// Findings for every alive host, ordered by address, then port, then severity (highest first).
    pub fn analyze_sweep(&self, sweep: &SweepResult) -> Vec<Finding> {
        let mut findings: Vec<Finding> = sweep
            .alive_hosts()
            .flat_map(|host| self.analyze_host(host))
            .collect();
        findings.sort_by(|a, b| {
            a.address
                .cmp(&b.address)
                .then(a.port.cmp(&b.port))
                .then(b.severity.cmp(&a.severity))
        });
        findings
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct EveryOpenPort;

    impl Analyzer for EveryOpenPort {
        fn name(&self) -> &str {
            "every-open-port"
        }

        fn analyze(&self, host: &HostResult) -> Vec<Finding> {
            host.open_ports
                .iter()
                .map(|&port| Finding::on_port(host, port, Severity::Info, "open", ""))
                .collect()
        }
    }

    fn host(addr: &str, ports: &[u16]) -> HostResult {
        let mut host = HostResult::new(addr.parse().unwrap());
        host.alive = true;
        for &port in ports {
            host.mark_open(port);
        }
        host
    }

    #[test]
    fn registry_tags_findings_with_their_source() {
        let mut registry = AnalyzerRegistry::new();
        registry.register(EveryOpenPort);

        let findings = registry.analyze_host(&host("10.0.0.1", &[22]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].source, "every-open-port");
    }

    #[test]
    fn sweep_findings_are_sorted_and_skip_dead_hosts() {
        let mut registry = AnalyzerRegistry::new();
        registry.register(EveryOpenPort);

        let mut dead = host("10.0.0.3", &[]);
        dead.alive = false;
        let sweep = SweepResult::assemble(
            Utc::now(),
            "10.0.0.0/29".into(),
            6,
            vec![host("10.0.0.9", &[80]), dead, host("10.0.0.2", &[443, 22])],
        );

        let findings = registry.analyze_sweep(&sweep);
        let keys: Vec<(String, Option<u16>)> = findings
            .iter()
            .map(|f| (f.address.to_string(), f.port))
            .collect();
        assert_eq!(
            keys,
            [
                ("10.0.0.2".to_string(), Some(22)),
                ("10.0.0.2".to_string(), Some(443)),
                ("10.0.0.9".to_string(), Some(80)),
            ]
        );
    }

    #[test]
    fn defaults_include_the_builtin_checks() {
        let registry = AnalyzerRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            ["open-rdp", "cleartext-protocols", "version-disclosure"]
        );
    }
}

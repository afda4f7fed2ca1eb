//! # Configuration
//!
//! Three layers feed a sweep:
//! * [`SweepOptions`]: the engine parameters (ports, timeouts, concurrency).
//! * [`Config`]: presentation switches owned by the binary.
//! * [`ScheduleFile`]: a TOML document declaring recurring jobs and their defaults.

use std::{collections::BTreeSet, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::error::DiscoveryError;

/// Ports probed when nothing else is configured.
pub const DEFAULT_PORTS: [u16; 5] = [22, 80, 443, 445, 3389];
pub const DEFAULT_POOL_CONCURRENCY: usize = 50;
pub const DEFAULT_PORT_CONCURRENCY: usize = 16;
pub const DEFAULT_LIVENESS_PORT: u16 = 80;
pub const DEFAULT_BANNER_BYTES: usize = 1024;

/// Presentation switches for the command line front-end.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Print the raw sweep result as JSON instead of the host tree.
    pub json: bool,
    /// Skip analyzer findings in the rendered output.
    pub no_findings: bool,
    /// 0 = full output, 1 = no headers, 2 = summary only.
    pub quiet: u8,
}

/// Parameters of a single sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    pub ports: BTreeSet<u16>,
    /// Port tried by the liveness check. A refusal on it still counts as alive.
    pub liveness_port: u16,
    /// Hard ceiling on one host's whole probe.
    pub host_timeout: Duration,
    pub port_timeout: Duration,
    /// Connect attempts per port before it is reported filtered.
    pub port_attempts: u8,
    pub banner_timeout: Duration,
    pub banner_max_bytes: usize,
    pub dns_timeout: Duration,
    pub pool_concurrency: usize,
    /// Per-host cap on simultaneous port connections.
    pub port_concurrency: usize,
    pub resolve_hostnames: bool,
    pub grab_banners: bool,
    /// Overall budget for the sweep. Unfinished addresses become `SweepTimeout`.
    pub sweep_deadline: Option<Duration>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            ports: BTreeSet::from(DEFAULT_PORTS),
            liveness_port: DEFAULT_LIVENESS_PORT,
            host_timeout: Duration::from_secs(30),
            port_timeout: Duration::from_secs(2),
            port_attempts: 1,
            banner_timeout: Duration::from_secs(1),
            banner_max_bytes: DEFAULT_BANNER_BYTES,
            dns_timeout: Duration::from_secs(2),
            pool_concurrency: DEFAULT_POOL_CONCURRENCY,
            port_concurrency: DEFAULT_PORT_CONCURRENCY,
            resolve_hostnames: true,
            grab_banners: true,
            sweep_deadline: None,
        }
    }
}

impl SweepOptions {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let fail = |msg: &str| Err(DiscoveryError::Configuration(msg.to_string()));

        if self.ports.is_empty() {
            return fail("port list is empty");
        }
        if self.ports.contains(&0) || self.liveness_port == 0 {
            return fail("port 0 cannot be probed");
        }
        if self.pool_concurrency == 0 {
            return fail("pool concurrency must be at least 1");
        }
        if self.port_concurrency == 0 {
            return fail("per-host port concurrency must be at least 1");
        }
        if self.port_attempts == 0 {
            return fail("port attempts must be at least 1");
        }
        if self.banner_max_bytes == 0 {
            return fail("banner byte limit must be at least 1");
        }
        let timeouts = [
            self.host_timeout,
            self.port_timeout,
            self.banner_timeout,
            self.dns_timeout,
        ];
        if timeouts.iter().any(Duration::is_zero) {
            return fail("timeouts must be greater than zero");
        }
        if self.sweep_deadline.is_some_and(|d| d.is_zero()) {
            return fail("sweep deadline must be greater than zero");
        }
        Ok(())
    }

    /// Upper bound on how long one port can keep a worker busy.
    pub fn port_budget(&self) -> Duration {
        self.port_timeout * u32::from(self.port_attempts)
    }
}

/// Parses a port list such as `"22,80,8000-8010"`.
pub fn parse_ports(s: &str) -> Result<BTreeSet<u16>, DiscoveryError> {
    let mut ports = BTreeSet::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start)?;
                let end = parse_port(end)?;
                if start > end {
                    return Err(DiscoveryError::Configuration(format!(
                        "port range '{part}' is reversed"
                    )));
                }
                ports.extend(start..=end);
            }
            None => {
                ports.insert(parse_port(part)?);
            }
        }
    }

    if ports.is_empty() {
        return Err(DiscoveryError::Configuration(format!("no ports in '{s}'")));
    }
    Ok(ports)
}

fn parse_port(s: &str) -> Result<u16, DiscoveryError> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(DiscoveryError::Configuration(format!("invalid port '{s}'"))),
        Ok(port) => Ok(port),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed schedule file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A schedule declared in TOML.
///
/// ```toml
/// [defaults]
/// ports = "22,80,443"
/// port_timeout = "1s"
/// concurrency = 100
///
/// [[jobs]]
/// id = "daily_scan"
/// cadence = "daily@02:00"
/// target = "10.0.0.0/24"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleFile {
    #[serde(default)]
    pub defaults: SweepSection,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobEntry {
    pub id: String,
    /// `interval:<duration>`, `daily@HH:MM` or `weekly@<day>@HH:MM`.
    pub cadence: String,
    pub target: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Optional overrides of [`SweepOptions`]; durations use `humantime` syntax.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSection {
    pub ports: Option<String>,
    pub liveness_port: Option<u16>,
    pub host_timeout: Option<String>,
    pub port_timeout: Option<String>,
    pub port_attempts: Option<u8>,
    pub banner_timeout: Option<String>,
    /// Bytes kept per banner.
    pub banner_max_bytes: Option<usize>,
    pub dns_timeout: Option<String>,
    pub concurrency: Option<usize>,
    pub port_concurrency: Option<usize>,
    pub resolve_hostnames: Option<bool>,
    pub grab_banners: Option<bool>,
    pub deadline: Option<String>,
}

impl SweepSection {
    pub fn apply(&self, mut options: SweepOptions) -> Result<SweepOptions, ConfigError> {
        if let Some(ports) = &self.ports {
            options.ports = parse_ports(ports).map_err(|e| ConfigError::invalid("ports", e))?;
        }
        if let Some(port) = self.liveness_port {
            options.liveness_port = port;
        }
        if let Some(raw) = &self.host_timeout {
            options.host_timeout = parse_duration("host_timeout", raw)?;
        }
        if let Some(raw) = &self.port_timeout {
            options.port_timeout = parse_duration("port_timeout", raw)?;
        }
        if let Some(attempts) = self.port_attempts {
            options.port_attempts = attempts;
        }
        if let Some(raw) = &self.banner_timeout {
            options.banner_timeout = parse_duration("banner_timeout", raw)?;
        }
        if let Some(bytes) = self.banner_max_bytes {
            options.banner_max_bytes = bytes;
        }
        if let Some(raw) = &self.dns_timeout {
            options.dns_timeout = parse_duration("dns_timeout", raw)?;
        }
        if let Some(concurrency) = self.concurrency {
            options.pool_concurrency = concurrency;
        }
        if let Some(concurrency) = self.port_concurrency {
            options.port_concurrency = concurrency;
        }
        if let Some(resolve) = self.resolve_hostnames {
            options.resolve_hostnames = resolve;
        }
        if let Some(grab) = self.grab_banners {
            options.grab_banners = grab;
        }
        if let Some(raw) = &self.deadline {
            options.sweep_deadline = Some(parse_duration("deadline", raw)?);
        }

        options
            .validate()
            .map_err(|e| ConfigError::invalid("defaults", e))?;
        Ok(options)
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::invalid(field, e))
}

impl ScheduleFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ScheduleFile = toml::from_str(contents)?;

        let mut seen = BTreeSet::new();
        for job in &file.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(ConfigError::invalid("jobs", format!("duplicate id '{}'", job.id)));
            }
        }
        Ok(file)
    }

    pub fn sweep_options(&self) -> Result<SweepOptions, ConfigError> {
        self.defaults.apply(SweepOptions::default())
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

    #[test]
    fn defaults_are_valid() {
        let options = SweepOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.pool_concurrency, 50);
        assert!(options.ports.contains(&3389));
    }

    #[test]
    fn zero_concurrency_is_a_configuration_error() {
        let options = SweepOptions {
            pool_concurrency: 0,
            ..SweepOptions::default()
        };
        assert!(matches!(options.validate(), Err(DiscoveryError::Configuration(_))));
    }

    #[test]
    fn zero_timeouts_and_empty_ports_are_rejected() {
        let no_ports = SweepOptions {
            ports: BTreeSet::new(),
            ..SweepOptions::default()
        };
        assert!(no_ports.validate().is_err());

        let instant = SweepOptions {
            port_timeout: Duration::ZERO,
            ..SweepOptions::default()
        };
        assert!(instant.validate().is_err());
    }

    #[test]
    fn port_lists_accept_ranges() {
        let ports = parse_ports("22, 80,8000-8002").unwrap();
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![22, 80, 8000, 8001, 8002]);

        assert!(parse_ports("0").is_err());
        assert!(parse_ports("70000").is_err());
        assert!(parse_ports("90-80").is_err());
        assert!(parse_ports(" , ").is_err());
    }

    #[test]
    fn schedule_file_applies_defaults() {
        let file = ScheduleFile::from_toml_str(
            r#"
            [defaults]
            ports = "22,80"
            port_timeout = "750ms"
            concurrency = 8
            banner_max_bytes = 256

            [[jobs]]
            id = "daily_scan"
            cadence = "daily@02:00"
            target = "10.0.0.0/24"

            [[jobs]]
            id = "office"
            cadence = "interval:15m"
            target = "192.168.1.0/24"
            enabled = false
            "#,
        )
        .unwrap();

        let options = file.sweep_options().unwrap();
        assert_eq!(options.ports, BTreeSet::from([22, 80]));
        assert_eq!(options.port_timeout, Duration::from_millis(750));
        assert_eq!(options.pool_concurrency, 8);
        assert_eq!(options.banner_max_bytes, 256);
        assert_eq!(file.jobs.len(), 2);
        assert!(file.jobs[0].enabled);
        assert!(!file.jobs[1].enabled);
    }

    #[test]
    fn schedule_file_rejects_duplicate_ids_and_bad_durations() {
        let dup = r#"
            [[jobs]]
            id = "a"
            cadence = "interval:10s"
            target = "10.0.0.1"
            [[jobs]]
            id = "a"
            cadence = "interval:10s"
            target = "10.0.0.2"
        "#;
        assert!(matches!(
            ScheduleFile::from_toml_str(dup),
            Err(ConfigError::Invalid { .. })
        ));

        let bad = ScheduleFile::from_toml_str("[defaults]\nport_timeout = \"soon\"").unwrap();
        assert!(bad.sweep_options().is_err());

        let empty_banners = ScheduleFile::from_toml_str("[defaults]\nbanner_max_bytes = 0").unwrap();
        assert!(empty_banners.sweep_options().is_err());
    }
}

pub mod discover;
pub mod schedule;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use vortex_common::config::{SweepOptions, parse_ports};
use vortex_common::error::DiscoveryError;

#[derive(Parser)]
#[command(name = "vortex")]
#[command(about = "Concurrent host and port discovery.", version)]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Do not run the built-in analyzers
    #[arg(long, global = true)]
    pub no_findings: bool,

    /// Reduce output (-q hides headers, -qq prints the summary only)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sweep an address block once
    #[command(alias = "d")]
    Discover {
        /// CIDR block or single address, e.g. 192.168.1.0/24
        target: String,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Run the jobs of a TOML schedule file until interrupted
    #[command(alias = "s")]
    Schedule { file: PathBuf },
}

#[derive(Args, Debug, Default)]
pub struct SweepArgs {
    /// Ports to probe, e.g. "22,80,8000-8010"
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Hosts probed at the same time
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Port connections per host at the same time
    #[arg(long)]
    pub port_concurrency: Option<usize>,

    /// Connect attempts per port before it counts as filtered
    #[arg(long)]
    pub attempts: Option<u8>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub port_timeout: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub banner_timeout: Option<Duration>,

    /// Bytes kept from each banner
    #[arg(long)]
    pub banner_bytes: Option<usize>,

    /// Ceiling for the whole probe of one host
    #[arg(long, value_parser = humantime::parse_duration)]
    pub host_timeout: Option<Duration>,

    /// Stop the sweep after this long; unfinished hosts are reported as timed out
    #[arg(long, value_parser = humantime::parse_duration)]
    pub deadline: Option<Duration>,

    /// Skip reverse DNS lookups
    #[arg(long)]
    pub no_dns: bool,

    /// Skip banner collection
    #[arg(long)]
    pub no_banner: bool,
}

impl SweepArgs {
    pub fn into_options(self) -> Result<SweepOptions, DiscoveryError> {
        let mut options = SweepOptions::default();

        if let Some(ports) = self.ports {
            options.ports = parse_ports(&ports)?;
        }
        if let Some(concurrency) = self.concurrency {
            options.pool_concurrency = concurrency;
        }
        if let Some(concurrency) = self.port_concurrency {
            options.port_concurrency = concurrency;
        }
        if let Some(attempts) = self.attempts {
            options.port_attempts = attempts;
        }
        if let Some(timeout) = self.port_timeout {
            options.port_timeout = timeout;
        }
        if let Some(timeout) = self.banner_timeout {
            options.banner_timeout = timeout;
        }
        if let Some(bytes) = self.banner_bytes {
            options.banner_max_bytes = bytes;
        }
        if let Some(timeout) = self.host_timeout {
            options.host_timeout = timeout;
        }
        options.sweep_deadline = self.deadline;
        options.resolve_hostnames = !self.no_dns;
        options.grab_banners = !self.no_banner;

        options.validate()?;
        Ok(options)
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
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
    use clap::CommandFactory;

    #[test]
    fn command_line_is_consistent() {
        CommandLine::command().debug_assert();
    }

    #[test]
    fn discover_flags_override_defaults() {
        let cli = CommandLine::try_parse_from([
            "vortex",
            "discover",
            "10.0.0.0/24",
            "--ports",
            "22,8000-8002",
            "--concurrency",
            "8",
            "--port-timeout",
            "500ms",
            "--deadline",
            "1m",
            "--banner-bytes",
            "128",
            "--no-dns",
        ])
        .unwrap();

        let Commands::Discover { target, sweep } = cli.command else {
            panic!("expected discover");
        };
        assert_eq!(target, "10.0.0.0/24");

        let options = sweep.into_options().unwrap();
        assert_eq!(options.ports.len(), 4);
        assert_eq!(options.pool_concurrency, 8);
        assert_eq!(options.port_timeout, Duration::from_millis(500));
        assert_eq!(options.sweep_deadline, Some(Duration::from_secs(60)));
        assert_eq!(options.banner_max_bytes, 128);
        assert!(!options.resolve_hostnames);
        assert!(options.grab_banners);
    }

    #[test]
    fn zero_concurrency_is_a_configuration_error() {
        let args = SweepArgs {
            concurrency: Some(0),
            ..SweepArgs::default()
        };
        assert!(matches!(args.into_options(), Err(DiscoveryError::Configuration(_))));
    }
}

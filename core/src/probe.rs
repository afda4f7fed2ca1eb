//! # Host Probe
//!
//! Per-address state machine:
//!
//! ```text
//! Pending ─> LivenessCheck ─┬─> Unreachable (terminal)
//!                           └─> PortSweep ─> HostnameResolution ─> BannerCollection ─> Complete
//! ```
//!
//! Unexpected I/O failures are written to [`HostResult::error`] and the machine moves on.
//! Only socket resource exhaustion escapes, as [`DiscoveryError::PoolFatal`].
//!
//! The task's timeout bounds the whole run. A probe that runs out of budget stops
//! where it is and keeps what it learned so far, flagged [`HostError::ProbeTimeout`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};

use vortex_common::config::SweepOptions;
use vortex_common::error::{DiscoveryError, HostError};
use vortex_common::network::host::HostResult;
use vortex_common::{debug, trace};

use crate::network::{ConnectOutcome, Connector, HostnameResolver, ResourceExhausted, is_resource_exhaustion};
use crate::pool::ProbeTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Pending,
    LivenessCheck,
    Unreachable,
    PortSweep,
    HostnameResolution,
    BannerCollection,
    Complete,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unreachable | Self::Complete)
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::LivenessCheck => "liveness check",
            Self::Unreachable => "unreachable",
            Self::PortSweep => "port sweep",
            Self::HostnameResolution => "hostname resolution",
            Self::BannerCollection => "banner collection",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Everything a probe needs besides its task. Cheap to clone; shared by a whole sweep.
#[derive(Clone)]
pub struct ProbeContext {
    pub connector: Arc<dyn Connector>,
    pub resolver: Arc<dyn HostnameResolver>,
    pub options: Arc<SweepOptions>,
}

impl fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

pub struct HostProbe {
    task: ProbeTask,
    ctx: ProbeContext,
    state: ProbeState,
    result: HostResult,
}

impl HostProbe {
    pub fn new(task: ProbeTask, ctx: ProbeContext) -> Self {
        let result = HostResult::new(task.address);
        Self {
            task,
            ctx,
            state: ProbeState::Pending,
            result,
        }
    }

    /// Drives the machine to a terminal state, or until the task's timeout runs out.
    pub async fn run(mut self) -> Result<HostResult, DiscoveryError> {
        let started = Instant::now();
        let deadline = started + self.task.timeout;

        while !self.state.is_terminal() {
            let stepped = timeout_at(deadline, self.step()).await;
            let next = match stepped {
                Ok(next) => next?,
                Err(_elapsed) => self.expire(),
            };
            trace!(address = %self.task.address, "{} -> {}", self.state, next);
            self.state = next;
        }

        self.result.probe_duration = started.elapsed();
        Ok(self.result)
    }

    /// Settles a probe whose budget ran out mid-state.
    fn expire(&mut self) -> ProbeState {
        debug!(
            address = %self.task.address,
            "budget of {:?} spent during {}",
            self.task.timeout,
            self.state
        );
        // Overrides an earlier stage error: the timeout explains the missing fields.
        self.result.error = Some(HostError::ProbeTimeout);

        if !self.result.alive {
            return ProbeState::Unreachable;
        }
        if self.ctx.options.grab_banners {
            for port in self.result.open_ports.clone() {
                self.result.banners.entry(port).or_default();
            }
        }
        ProbeState::Complete
    }

    async fn step(&mut self) -> Result<ProbeState, DiscoveryError> {
        match self.state {
            ProbeState::Pending => Ok(ProbeState::LivenessCheck),
            ProbeState::LivenessCheck => self.check_liveness().await,
            ProbeState::PortSweep => self.sweep_ports().await,
            ProbeState::HostnameResolution => {
                self.resolve_hostname().await;
                Ok(ProbeState::BannerCollection)
            }
            ProbeState::BannerCollection => {
                self.collect_banners().await?;
                Ok(ProbeState::Complete)
            }
            terminal @ (ProbeState::Unreachable | ProbeState::Complete) => Ok(terminal),
        }
    }

    /// A refusal proves something answered at the address, so it counts as alive.
    async fn check_liveness(&mut self) -> Result<ProbeState, DiscoveryError> {
        let options = &self.ctx.options;
        let port = options.liveness_port;
        let target = SocketAddr::new(self.task.address, port);

        match self.ctx.connector.connect(target, options.port_timeout).await? {
            ConnectOutcome::Open => {
                self.result.alive = true;
                if self.task.ports.contains(&port) {
                    self.result.mark_open(port);
                }
                Ok(ProbeState::PortSweep)
            }
            ConnectOutcome::Refused => {
                self.result.alive = true;
                Ok(ProbeState::PortSweep)
            }
            ConnectOutcome::TimedOut | ConnectOutcome::Unreachable => Ok(ProbeState::Unreachable),
            ConnectOutcome::Failed(message) => {
                debug!(%target, "liveness check failed: {message}");
                self.result.record_error(HostError::io("liveness check", message));
                Ok(ProbeState::PortSweep)
            }
        }
    }

    async fn sweep_ports(&mut self) -> Result<ProbeState, DiscoveryError> {
        let options = Arc::clone(&self.ctx.options);
        let limiter = Arc::new(Semaphore::new(options.port_concurrency));
        let mut knocks: JoinSet<(u16, Result<ConnectOutcome, ResourceExhausted>)> = JoinSet::new();

        for &port in self.task.ports.iter() {
            if self.result.open_ports.contains(&port) {
                continue;
            }
            let connector = Arc::clone(&self.ctx.connector);
            let limiter = Arc::clone(&limiter);
            let target = SocketAddr::new(self.task.address, port);
            let port_timeout = options.port_timeout;
            let attempts = options.port_attempts;

            knocks.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                (port, knock(connector.as_ref(), target, port_timeout, attempts).await)
            });
        }

        while let Some(joined) = knocks.join_next().await {
            let (port, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    self.result.record_error(HostError::io("port sweep", e));
                    continue;
                }
            };

            match outcome {
                Err(fatal) => {
                    knocks.abort_all();
                    return Err(fatal.into());
                }
                Ok(ConnectOutcome::Open) => {
                    debug!(address = %self.task.address, "port {port} open");
                    self.result.mark_open(port);
                    self.result.alive = true;
                }
                Ok(ConnectOutcome::TimedOut) => {
                    debug!(address = %self.task.address, "port {port} filtered");
                    self.result.mark_filtered(port);
                }
                Ok(ConnectOutcome::Refused | ConnectOutcome::Unreachable) => {
                    trace!(address = %self.task.address, "port {port} closed");
                }
                Ok(ConnectOutcome::Failed(message)) => {
                    debug!(address = %self.task.address, "port {port}: {message}");
                    self.result
                        .record_error(HostError::io("port sweep", format!("port {port}: {message}")));
                }
            }
        }

        if self.result.alive {
            Ok(ProbeState::HostnameResolution)
        } else {
            Ok(ProbeState::Unreachable)
        }
    }

    async fn resolve_hostname(&mut self) {
        let options = &self.ctx.options;
        if !options.resolve_hostnames {
            return;
        }

        let address = self.task.address;
        match timeout(options.dns_timeout, self.ctx.resolver.reverse_lookup(address)).await {
            Ok(Ok(name)) => self.result.hostname = name,
            Ok(Err(e)) => debug!(%address, "reverse lookup failed: {e:#}"),
            Err(_) => debug!(%address, "reverse lookup timed out"),
        }
    }

    async fn collect_banners(&mut self) -> Result<(), DiscoveryError> {
        let options = Arc::clone(&self.ctx.options);
        if !options.grab_banners || self.result.open_ports.is_empty() {
            return Ok(());
        }

        let limiter = Arc::new(Semaphore::new(options.port_concurrency));
        let mut reads: JoinSet<(u16, std::io::Result<Vec<u8>>)> = JoinSet::new();

        for &port in self.result.open_ports.iter() {
            let connector = Arc::clone(&self.ctx.connector);
            let limiter = Arc::clone(&limiter);
            let target = SocketAddr::new(self.task.address, port);
            let (budget, max_bytes) = (options.banner_timeout, options.banner_max_bytes);

            reads.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                (port, connector.read_banner(target, budget, max_bytes).await)
            });
        }

        while let Some(joined) = reads.join_next().await {
            let Ok((port, read)) = joined else {
                continue;
            };
            let banner = match read {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if is_resource_exhaustion(&e) => {
                    reads.abort_all();
                    return Err(ResourceExhausted(e.to_string()).into());
                }
                Err(e) => {
                    debug!(address = %self.task.address, "no banner on {port}: {e}");
                    String::new()
                }
            };
            self.result.insert_banner(port, banner);
        }

        // Ports whose read task died still get an entry.
        for port in self.result.open_ports.clone() {
            self.result.banners.entry(port).or_default();
        }
        Ok(())
    }
}

/// Connects up to `attempts` times. Only timeouts are retried.
async fn knock(
    connector: &dyn Connector,
    target: SocketAddr,
    port_timeout: Duration,
    attempts: u8,
) -> Result<ConnectOutcome, ResourceExhausted> {
    for attempt in 1..=attempts {
        match connector.connect(target, port_timeout).await? {
            ConnectOutcome::TimedOut => trace!(%target, "attempt {attempt}/{attempts} timed out"),
            decided => return Ok(decided),
        }
    }
    Ok(ConnectOutcome::TimedOut)
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
    use std::collections::BTreeSet;

    use crate::network::NoopResolver;
    use crate::network::scripted::{CallKind, HostScript, ScriptedConnector, TableResolver};

    fn options(ports: &[u16]) -> SweepOptions {
        SweepOptions {
            ports: ports.iter().copied().collect(),
            ..SweepOptions::default()
        }
    }

    fn probe(
        addr: &str,
        connector: &Arc<ScriptedConnector>,
        resolver: Arc<dyn HostnameResolver>,
        options: SweepOptions,
    ) -> HostProbe {
        let task = ProbeTask {
            address: addr.parse().unwrap(),
            ports: Arc::new(options.ports.clone()),
            timeout: options.host_timeout,
            generation: 1,
        };
        let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
        let ctx = ProbeContext {
            connector,
            resolver,
            options: Arc::new(options),
        };
        HostProbe::new(task, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn host_accepting_on_80_only() {
        let net = Arc::new(ScriptedConnector::new().host("192.0.2.1", HostScript::open(&[80])));
        let mut opts = options(&[22, 80]);
        opts.grab_banners = false;

        let result = probe("192.0.2.1", &net, Arc::new(NoopResolver), opts)
            .run()
            .await
            .unwrap();

        assert!(result.alive);
        assert_eq!(result.open_ports, BTreeSet::from([80]));
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_host_short_circuits_to_unreachable() {
        let net = Arc::new(ScriptedConnector::new());
        let result = probe("192.0.2.2", &net, Arc::new(NoopResolver), options(&[22, 80]))
            .run()
            .await
            .unwrap();

        assert!(!result.alive);
        assert!(result.open_ports.is_empty());
        assert!(result.banners.is_empty());
        assert_eq!(net.calls_for("192.0.2.2"), vec![(80, CallKind::Connect)]);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_liveness_port_still_counts_as_alive() {
        let net = Arc::new(ScriptedConnector::new().host("192.0.2.3", HostScript::open(&[22])));
        let result = probe("192.0.2.3", &net, Arc::new(NoopResolver), options(&[22, 443]))
            .run()
            .await
            .unwrap();

        assert!(result.alive);
        assert_eq!(result.open_ports, BTreeSet::from([22]));
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_port_costs_at_most_timeout_times_attempts() {
        let net = Arc::new(
            ScriptedConnector::new().host("192.0.2.4", HostScript::open(&[22]).filtered(&[8080])),
        );
        let mut opts = options(&[22, 8080]);
        opts.port_attempts = 2;
        opts.grab_banners = false;
        let budget = opts.port_budget();

        let began = Instant::now();
        let result = probe("192.0.2.4", &net, Arc::new(NoopResolver), opts)
            .run()
            .await
            .unwrap();

        assert!(began.elapsed() <= budget + Duration::from_millis(10));
        assert_eq!(result.open_ports, BTreeSet::from([22]));
        assert_eq!(result.filtered_ports, BTreeSet::from([8080]));
        let knocks_on_8080 = net
            .calls_for("192.0.2.4")
            .into_iter()
            .filter(|(port, _)| *port == 8080)
            .count();
        assert_eq!(knocks_on_8080, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn banners_cover_every_open_port() {
        let net = Arc::new(
            ScriptedConnector::new().host(
                "192.0.2.5",
                HostScript::open(&[22, 80]).banner(22, "SSH-2.0-OpenSSH_9.6\r\n"),
            ),
        );
        let result = probe("192.0.2.5", &net, Arc::new(NoopResolver), options(&[22, 80, 443]))
            .run()
            .await
            .unwrap();

        assert_eq!(result.banner(22), Some("SSH-2.0-OpenSSH_9.6\r\n"));
        assert_eq!(result.banner(80), Some(""));
        assert_eq!(result.banners.len(), 2);
        assert!(result.banners.keys().all(|p| result.open_ports.contains(p)));
    }

    #[tokio::test(start_paused = true)]
    async fn port_failure_is_recorded_and_probe_continues() {
        let net = Arc::new(
            ScriptedConnector::new().host(
                "192.0.2.6",
                HostScript::open(&[80]).failing(445, "permission denied"),
            ),
        );
        let resolver = Arc::new(TableResolver::default().with("192.0.2.6", "files.lan"));
        let result = probe("192.0.2.6", &net, resolver, options(&[80, 445]))
            .run()
            .await
            .unwrap();

        assert!(result.alive);
        assert_eq!(result.hostname.as_deref(), Some("files.lan"));
        assert!(matches!(result.error, Some(HostError::Io { .. })));
        assert!(result.banners.contains_key(&80));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reverse_lookup_is_silent() {
        let net = Arc::new(ScriptedConnector::new().host("192.0.2.7", HostScript::open(&[80])));
        let result = probe(
            "192.0.2.7",
            &net,
            Arc::new(TableResolver::default()),
            options(&[80]),
        )
        .run()
        .await
        .unwrap();

        assert!(result.hostname.is_none());
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn port_concurrency_is_capped_per_host() {
        let ports: Vec<u16> = (1000..1040).collect();
        let net = Arc::new(
            ScriptedConnector::new()
                .host("192.0.2.8", HostScript::open(&ports[..5]))
                .latency(Duration::from_millis(20)),
        );
        let mut opts = options(&ports);
        opts.port_concurrency = 4;
        opts.grab_banners = false;

        let result = probe("192.0.2.8", &net, Arc::new(NoopResolver), opts)
            .run()
            .await
            .unwrap();

        assert_eq!(result.open_ports.len(), 5);
        assert!(net.peak_connections() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn spent_budget_keeps_what_was_learned() {
        let filtered: Vec<u16> = (8000..8020).collect();
        let net = Arc::new(ScriptedConnector::new().host(
            "192.0.2.10",
            HostScript::open(&[80]).filtered(&filtered),
        ));
        let resolver = Arc::new(TableResolver::default().with("192.0.2.10", "slow.lan"));
        let mut ports = filtered.clone();
        ports.push(80);
        let mut opts = options(&ports);
        opts.port_concurrency = 1;
        opts.host_timeout = Duration::from_secs(10);

        let began = Instant::now();
        let result = probe("192.0.2.10", &net, resolver, opts)
            .run()
            .await
            .unwrap();

        assert!(began.elapsed() <= Duration::from_secs(10) + Duration::from_millis(10));
        assert!(result.alive);
        assert_eq!(result.open_ports, BTreeSet::from([80]));
        assert_eq!(result.error, Some(HostError::ProbeTimeout));
        assert!(!result.filtered_ports.is_empty());
        assert!(result.filtered_ports.len() < filtered.len());
        assert_eq!(result.banner(80), Some(""));
        assert!(result.hostname.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn budget_spent_on_a_silent_host_stays_unreachable() {
        let net = Arc::new(ScriptedConnector::new());
        let mut opts = options(&[22, 80]);
        opts.host_timeout = Duration::from_millis(500);

        let result = probe("192.0.2.11", &net, Arc::new(NoopResolver), opts)
            .run()
            .await
            .unwrap();

        assert!(!result.alive);
        assert!(result.open_ports.is_empty());
        assert_eq!(result.error, Some(HostError::ProbeTimeout));
    }

    #[tokio::test]
    async fn exhaustion_escapes_as_pool_fatal() {
        let net = Arc::new(ScriptedConnector::new().host("192.0.2.9", HostScript::exhausted()));
        let outcome = probe("192.0.2.9", &net, Arc::new(NoopResolver), options(&[80]))
            .run()
            .await;

        assert!(matches!(outcome, Err(DiscoveryError::PoolFatal { .. })));
    }

    #[test]
    fn only_unreachable_and_complete_are_terminal() {
        assert!(ProbeState::Unreachable.is_terminal());
        assert!(ProbeState::Complete.is_terminal());
        assert!(!ProbeState::PortSweep.is_terminal());
    }
}

//! # Discovery Coordinator
//!
//! Runs one sweep over an [`AddressSpace`]:
//! 1. submits a [`ProbeTask`] per address to a fresh [`ProbeWorkerPool`],
//! 2. collects [`HostResult`]s in completion order, streaming each to an optional callback,
//! 3. assembles the [`SweepResult`] once everything resolved, the deadline passed,
//!    or the caller cancelled.
//!
//! Every address of the space yields exactly one result. Addresses the sweep never
//! finished carry [`HostError::SweepTimeout`] (deadline, cancellation) or
//! [`HostError::PoolFatal`] (socket exhaustion).

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, info_span};

use vortex_common::config::SweepOptions;
use vortex_common::error::{DiscoveryError, HostError};
use vortex_common::network::address_space::AddressSpace;
use vortex_common::network::host::HostResult;
use vortex_common::network::sweep::SweepResult;
use vortex_common::{debug, error, info, success, warn};

use crate::network::{Connector, DnsResolver, HostnameResolver, TcpConnector};
use crate::pool::{ProbeTask, ProbeWorkerPool};
use crate::probe::{HostProbe, ProbeContext};

/// Position of a streamed result within its sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepProgress {
    pub completed: usize,
    pub total: usize,
}

pub type ResultCallback = Arc<dyn Fn(&HostResult, SweepProgress) + Send + Sync>;

/// Cooperative stop signal for a running sweep. Clones share the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Application service orchestrating sweeps.
///
/// Holds the network seams only; each sweep gets its own worker pool, so one
/// coordinator can serve overlapping sweeps (e.g. several scheduled jobs).
pub struct DiscoveryCoordinator {
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn HostnameResolver>,
    generation: AtomicU64,
}

impl DiscoveryCoordinator {
    pub fn new(connector: Arc<dyn Connector>, resolver: Arc<dyn HostnameResolver>) -> Self {
        Self {
            connector,
            resolver,
            generation: AtomicU64::new(0),
        }
    }

    /// Real TCP connects and reverse lookups against the system's nameserver.
    pub fn with_system_defaults() -> Self {
        Self::new(Arc::new(TcpConnector), Arc::new(DnsResolver::from_system()))
    }

    pub async fn run_sweep(
        &self,
        space: &AddressSpace,
        options: &SweepOptions,
    ) -> Result<SweepResult, DiscoveryError> {
        self.sweep(space, options).run().await
    }

    /// Builder for a sweep with streaming or cancellation attached.
    pub fn sweep<'a>(&'a self, space: &'a AddressSpace, options: &'a SweepOptions) -> Sweep<'a> {
        Sweep {
            coordinator: self,
            space,
            options,
            on_result: None,
            cancel: None,
        }
    }
}

#[must_use = "a sweep does nothing until `run` is awaited"]
pub struct Sweep<'a> {
    coordinator: &'a DiscoveryCoordinator,
    space: &'a AddressSpace,
    options: &'a SweepOptions,
    on_result: Option<ResultCallback>,
    cancel: Option<CancelToken>,
}

impl<'a> Sweep<'a> {
    /// Called once per address, in completion order, as soon as its result exists.
    pub fn on_result<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HostResult, SweepProgress) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(callback));
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn run(self) -> Result<SweepResult, DiscoveryError> {
        self.options.validate()?;
        let generation = self.coordinator.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("sweep", target = %self.space, generation);
        self.execute(generation).instrument(span).await
    }

    async fn execute(self, generation: u64) -> Result<SweepResult, DiscoveryError> {
        let Sweep {
            coordinator,
            space,
            options,
            on_result,
            cancel,
        } = self;

        let started_at = Utc::now();
        let total = space.len();
        info!(
            "sweeping {total} addresses, {} ports each, {} at a time",
            options.ports.len(),
            options.pool_concurrency
        );

        let pool = ProbeWorkerPool::new(options.pool_concurrency)?;
        let ctx = ProbeContext {
            connector: Arc::clone(&coordinator.connector),
            resolver: Arc::clone(&coordinator.resolver),
            options: Arc::new(options.clone()),
        };
        let ports = Arc::new(options.ports.clone());
        let cancel = cancel.unwrap_or_default();
        let deadline = options.sweep_deadline.map(|budget| Instant::now() + budget);

        let mut collector = Collector::new(total, on_result);
        let mut pending = space.iter().peekable();
        let mut outstanding: BTreeSet<IpAddr> = BTreeSet::new();
        let mut inflight: JoinSet<(IpAddr, Result<HostResult, DiscoveryError>)> = JoinSet::new();
        let mut halt: Option<HostError> = None;
        let mut fatal: Option<String> = None;

        loop {
            if inflight.is_empty() && (halt.is_some() || pending.peek().is_none()) {
                break;
            }

            let next = if halt.is_none() { pending.peek().copied() } else { None };
            let submission = async {
                match next {
                    Some(address) => {
                        let task = ProbeTask {
                            address,
                            ports: Arc::clone(&ports),
                            timeout: options.host_timeout,
                            generation,
                        };
                        let ctx = ctx.clone();
                        Some(pool.submit(task, move |task| HostProbe::new(task, ctx).run()).await)
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if halt.is_none() => {
                    warn!("sweep cancelled, {} addresses left unprobed", total - collector.completed());
                    halt = Some(HostError::SweepTimeout);
                    pool.close();
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if halt.is_none() && deadline.is_some() => {
                    warn!("sweep deadline reached, {} addresses left unprobed", total - collector.completed());
                    halt = Some(HostError::SweepTimeout);
                    pool.close();
                }

                Some(joined) = inflight.join_next() => {
                    let Ok((address, outcome)) = joined else {
                        continue;
                    };
                    match outcome {
                        Ok(result) => {
                            outstanding.remove(&address);
                            collector.push(result);
                        }
                        Err(DiscoveryError::PoolClosed) => {
                            // Discarded by close/abort; filled in below.
                        }
                        Err(DiscoveryError::PoolFatal { message, .. }) => {
                            if fatal.is_none() {
                                error!(%address, "aborting sweep: {message}");
                                halt = Some(HostError::PoolFatal { message: message.clone() });
                                fatal = Some(message);
                                pool.abort();
                            }
                        }
                        Err(other) => {
                            outstanding.remove(&address);
                            collector.push(HostResult::failed(address, HostError::io("probe", other)));
                        }
                    }
                }

                Some(submitted) = submission, if next.is_some() => {
                    match submitted {
                        Ok(handle) => {
                            let address = handle.address();
                            pending.next();
                            outstanding.insert(address);
                            inflight.spawn(async move { (address, handle.await) });
                        }
                        Err(e) => {
                            debug!("pool refused work: {e}");
                            halt.get_or_insert(HostError::SweepTimeout);
                        }
                    }
                }

                else => break,
            }
        }

        let halt = halt.unwrap_or(HostError::SweepTimeout);
        for address in outstanding.into_iter().chain(pending) {
            collector.push(HostResult::failed(address, halt.clone()));
        }

        let stats = pool.shutdown().await;
        debug!(
            "pool finished: {} probes run, {} discarded, peak {}",
            stats.completed, stats.discarded, stats.peak
        );

        let result = SweepResult::assemble(started_at, space.to_string(), total, collector.into_results());
        match fatal {
            Some(message) => Err(DiscoveryError::PoolFatal {
                message,
                partial: Some(Box::new(result)),
            }),
            None => {
                success!(
                    "sweep of {} finished in {:.2?}: {} alive, {} open ports",
                    result.address_space,
                    result.duration(),
                    result.summary.alive,
                    result.summary.open_ports
                );
                Ok(result)
            }
        }
    }
}

/// Keeps results in completion order and drives the progress callback.
struct Collector {
    total: usize,
    results: Vec<HostResult>,
    on_result: Option<ResultCallback>,
}

impl Collector {
    fn new(total: usize, on_result: Option<ResultCallback>) -> Self {
        Self {
            total,
            results: Vec::new(),
            on_result,
        }
    }

    fn completed(&self) -> usize {
        self.results.len()
    }

    fn push(&mut self, result: HostResult) {
        if result.alive {
            debug!(address = %result.address, "alive, {} open ports", result.open_ports.len());
        }
        self.results.push(result);
        if let (Some(callback), Some(last)) = (&self.on_result, self.results.last()) {
            let progress = SweepProgress {
                completed: self.results.len(),
                total: self.total,
            };
            callback(last, progress);
        }
    }

    fn into_results(self) -> Vec<HostResult> {
        self.results
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

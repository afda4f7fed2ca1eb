//! # Probe Worker Pool
//!
//! A fixed set of worker tasks pulling jobs from one FIFO queue.
//!
//! * At most `max_concurrency` probes run at once, one per worker.
//! * Jobs start in submission order; they may finish in any order.
//! * Probes enforce their own budget. The pool only adds a backstop of the task's
//!   timeout plus [`OVERRUN_GRACE`], so a worker is never held longer than that, and
//!   a panicking probe is turned into a failed [`HostResult`] instead of taking its
//!   worker down.
//!
//! [`ProbeWorkerPool::close`] stops intake and discards queued jobs,
//! [`ProbeWorkerPool::abort`] additionally drops the running ones, and
//! [`ProbeWorkerPool::shutdown`] closes and then waits for in-flight work.

use std::any::Any;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::IpAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use vortex_common::error::{DiscoveryError, HostError};
use vortex_common::network::host::HostResult;
use vortex_common::warn;

/// Slack past a task's own timeout before the pool drops the probe.
pub const OVERRUN_GRACE: Duration = Duration::from_millis(250);

/// Extra time granted on shutdown beyond the longest backstop.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type ProbeOutcome = Result<HostResult, DiscoveryError>;

/// One unit of work for the pool.
#[derive(Debug, Clone)]
pub struct ProbeTask {
    pub address: IpAddr,
    pub ports: Arc<BTreeSet<u16>>,
    /// Budget for the whole probe of this address.
    pub timeout: Duration,
    /// Identifies the sweep that produced the task.
    pub generation: u64,
}

/// Resolves to the probe's outcome once a worker has run it.
#[derive(Debug)]
pub struct ProbeHandle {
    address: IpAddr,
    rx: oneshot::Receiver<ProbeOutcome>,
}

impl ProbeHandle {
    pub fn address(&self) -> IpAddr {
        self.address
    }
}

impl Future for ProbeHandle {
    type Output = ProbeOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The job was discarded or aborted before it could answer.
            Poll::Ready(Err(_)) => Poll::Ready(Err(DiscoveryError::PoolClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub peak: usize,
    pub completed: usize,
    pub discarded: usize,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
    discarded: AtomicUsize,
}

struct ActiveGuard<'a>(&'a Counters);

impl<'a> ActiveGuard<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ProbeWorkerPool {
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closing: Arc<AtomicBool>,
    counters: Arc<Counters>,
    longest_timeout_ms: AtomicU64,
    max_concurrency: usize,
}

impl std::fmt::Debug for ProbeWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeWorkerPool")
            .field("max_concurrency", &self.max_concurrency)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ProbeWorkerPool {
    /// Spawns `max_concurrency` workers on the current tokio runtime.
    pub fn new(max_concurrency: usize) -> Result<Self, DiscoveryError> {
        if max_concurrency == 0 {
            return Err(DiscoveryError::Configuration(
                "pool concurrency must be at least 1".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel::<Job>(max_concurrency);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let closing = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let workers = (0..max_concurrency)
            .map(|_| {
                tokio::spawn(run_worker(
                    Arc::clone(&rx),
                    Arc::clone(&closing),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            closing,
            counters,
            longest_timeout_ms: AtomicU64::new(0),
            max_concurrency,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Queues `work(task)`. Waits while the queue is full.
    ///
    /// Cancel-safe: if the returned future is dropped before completing, nothing was queued.
    pub async fn submit<F, Fut>(&self, task: ProbeTask, work: F) -> Result<ProbeHandle, DiscoveryError>
    where
        F: FnOnce(ProbeTask) -> Fut + Send + 'static,
        Fut: Future<Output = ProbeOutcome> + Send + 'static,
    {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DiscoveryError::PoolClosed)?;

        let address = task.address;
        let budget = task.timeout + OVERRUN_GRACE;
        let (tx, rx) = oneshot::channel::<ProbeOutcome>();

        let job: Job = Box::pin(async move {
            let started = tokio::time::Instant::now();
            let bounded = tokio::time::timeout(budget, work(task));
            let outcome = match CatchUnwind(Box::pin(bounded)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_elapsed)) => {
                    // The probe ignored its own deadline; nothing it learned survives.
                    warn!(%address, "probe overran its backstop of {budget:?}");
                    let mut result = HostResult::failed(address, HostError::ProbeTimeout);
                    result.probe_duration = started.elapsed();
                    Ok(result)
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(%address, "probe panicked: {message}");
                    Ok(HostResult::failed(address, HostError::io("probe", message)))
                }
            };
            let _ = tx.send(outcome);
        });

        self.longest_timeout_ms
            .fetch_max(budget.as_millis() as u64, Ordering::Relaxed);
        sender.send(job).await.map_err(|_| DiscoveryError::PoolClosed)?;

        Ok(ProbeHandle { address, rx })
    }

    /// Stops intake. Queued jobs are discarded and their handles resolve to
    /// [`DiscoveryError::PoolClosed`]; running jobs continue.
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Closes the pool and drops every running job.
    pub fn abort(&self) {
        self.close();
        for worker in self.workers.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            worker.abort();
        }
    }

    /// Closes the pool and waits for in-flight probes.
    ///
    /// Returns within the longest submitted backstop plus [`SHUTDOWN_GRACE`];
    /// workers still busy after that are aborted.
    pub async fn shutdown(self) -> PoolStats {
        self.close();

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let limit = Duration::from_millis(self.longest_timeout_ms.load(Ordering::Relaxed))
            + SHUTDOWN_GRACE;
        let abort_handles: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        let drained = tokio::time::timeout(limit, async {
            for worker in workers {
                let _ = worker.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("probe pool did not drain within {limit:?}, aborting workers");
            for handle in abort_handles {
                handle.abort();
            }
        }

        self.stats()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.counters.active.load(Ordering::SeqCst),
            peak: self.counters.peak.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            discarded: self.counters.discarded.load(Ordering::SeqCst),
        }
    }
}

impl Drop for ProbeWorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_worker(
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    closing: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        if closing.load(Ordering::SeqCst) {
            counters.discarded.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let _active = ActiveGuard::enter(&counters);
        job.await;
    }
}

/// Turns a panic inside the wrapped future into an `Err`.
struct CatchUnwind<F>(Pin<Box<F>>);

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.0.as_mut();
        match std::panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "probe task panicked".to_string())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

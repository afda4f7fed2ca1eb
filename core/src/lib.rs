//! # Discovery Engine
//!
//! Control flow of a sweep:
//!
//! ```text
//! ScanScheduler ──┐
//!                 ├─> DiscoveryCoordinator::run_sweep(AddressSpace)
//! CLI ────────────┘        │
//!                          ├─> ProbeWorkerPool (bounded, FIFO)
//!                          │        └─> HostProbe per address
//!                          └─> SweepResult
//! ```
//!
//! Network access goes through the [`network::Connector`] and
//! [`network::HostnameResolver`] traits so every layer above them can be exercised
//! without touching real sockets.

pub mod discovery;
pub mod network;
pub mod pool;
pub mod probe;
pub mod scheduler;

pub use discovery::{CancelToken, DiscoveryCoordinator, SweepProgress};
pub use pool::{PoolStats, ProbeHandle, ProbeTask, ProbeWorkerPool};
pub use probe::{HostProbe, ProbeContext, ProbeState};
pub use scheduler::{Cadence, JobOutcome, JobReport, JobUpdate, ScanScheduler, ScheduledJob, SchedulerError};

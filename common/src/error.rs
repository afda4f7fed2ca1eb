//! # Error Taxonomy
//!
//! Two kinds of failure exist in a sweep:
//!
//! * [`DiscoveryError`] is returned to the caller and ends the request it belongs to.
//! * [`HostError`] is recorded inside a single [`HostResult`](crate::network::host::HostResult)
//!   and never interrupts the rest of the sweep.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::sweep::SweepResult;

/// Failures surfaced to whoever requested a sweep.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The address specification could not be turned into an address space.
    #[error("invalid address range '{spec}': {reason}")]
    InvalidRange { spec: String, reason: String },

    /// Pool or sweep parameters are unusable.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A socket-level condition (e.g. descriptor exhaustion) made further probing pointless.
    ///
    /// When raised by a sweep, `partial` holds the finished result in which every
    /// outstanding address carries [`HostError::PoolFatal`].
    #[error("probe pool failed: {message}")]
    PoolFatal {
        message: String,
        partial: Option<Box<SweepResult>>,
    },

    /// Work was submitted to a pool that no longer accepts it.
    #[error("probe pool is shut down")]
    PoolClosed,
}

impl DiscoveryError {
    pub fn invalid_range(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    pub fn pool_fatal(message: impl Into<String>) -> Self {
        Self::PoolFatal {
            message: message.into(),
            partial: None,
        }
    }

    /// The sweep result attached to a [`DiscoveryError::PoolFatal`], if any.
    pub fn partial_result(&self) -> Option<&SweepResult> {
        match self {
            Self::PoolFatal { partial, .. } => partial.as_deref(),
            _ => None,
        }
    }

    /// Takes the partial sweep out of a [`DiscoveryError::PoolFatal`].
    /// Any other error, or a fatal one without a result, is handed back.
    pub fn into_partial_result(self) -> Result<SweepResult, Self> {
        match self {
            Self::PoolFatal {
                partial: Some(partial),
                ..
            } => Ok(*partial),
            other => Err(other),
        }
    }
}

/// Failures demoted to a field of a single host's result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostError {
    /// The probe did not finish within its host-level time budget.
    #[error("probe exceeded its time budget")]
    ProbeTimeout,

    /// The sweep ended (deadline or cancellation) before this address completed.
    #[error("sweep ended before this address was probed")]
    SweepTimeout,

    /// The sweep was aborted by a pool-level failure.
    #[error("sweep aborted: {message}")]
    PoolFatal { message: String },

    /// An unexpected I/O failure inside one probe stage.
    #[error("{stage} failed: {message}")]
    Io { stage: String, message: String },
}

impl HostError {
    pub fn io(stage: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            stage: stage.into(),
            message: err.to_string(),
        }
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

//! Shared vocabulary of the **vortex** discovery engine.
//!
//! Everything that crosses a crate boundary lives here: the address model
//! ([`network::address_space`]), probe and sweep results, the error taxonomy and
//! the configuration surface consumed by both the engine and the binary.

pub mod config;
pub mod error;
pub mod log;
pub mod network;

pub use tracing::{debug, error, info, trace, warn};

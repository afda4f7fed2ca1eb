//! Socket-facing seams of the engine.

pub mod resolver;
pub mod tcp;

#[cfg(test)]
pub(crate) mod scripted;

pub use resolver::{DnsResolver, HostnameResolver, NoopResolver};
pub use tcp::{ConnectOutcome, Connector, ResourceExhausted, TcpConnector, is_resource_exhaustion};

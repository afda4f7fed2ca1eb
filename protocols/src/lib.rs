//! Wire formats spoken by the discovery engine.
//!
//! The engine treats scanned services as opaque byte streams; the only protocol it
//! speaks itself is DNS, for reverse lookups.

pub mod dns;

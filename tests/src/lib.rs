#![cfg(test)]
//! End-to-end checks against loopback fixtures. Linux routes all of 127.0.0.0/8 to
//! the loopback interface, which the block sweeps below rely on.

mod discovery;
mod scheduler;
mod util;

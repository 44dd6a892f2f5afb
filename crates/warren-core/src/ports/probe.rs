//! OS-level check for ports bound by processes the allocator never tracked.

use std::{
    io::ErrorKind,
    net::{Ipv4Addr, TcpListener},
};

pub trait PortProbe: Send + Sync {
    /// Returns true if something outside the allocator is listening on `port`.
    fn is_bound(&self, port: u16) -> bool;
}

/// Probes by binding `127.0.0.1:<port>` and dropping the listener at once.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpBindProbe;

impl PortProbe for TcpBindProbe {
    fn is_bound(&self, port: u16) -> bool {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(_listener) => false,
            Err(e) if e.kind() == ErrorKind::AddrInUse => true,
            Err(e) => {
                tracing::debug!(port, error = %e, "bind probe failed for another reason");
                false
            }
        }
    }
}

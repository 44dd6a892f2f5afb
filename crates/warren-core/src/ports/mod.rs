//! Port allocation: reservations, OS-level probing and project port hints.

mod allocator;
mod detect;
mod probe;

#[cfg(test)]
mod tests_allocator;

pub use allocator::{PortAllocator, DEFAULT_SERVICE};
pub use detect::detect_project_ports;
pub use probe::{PortProbe, TcpBindProbe};

//! Socket-backed collaborators for the host network stack.

pub mod capture;
pub mod iface;
pub mod udp;

//! Error types for configuration and measurement runs.

use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

// ── Configuration ───────────────────────────────────────────────────

/// Rejected before any phase starts; never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("group count {0} outside 1..=254")]
    InvalidCount(u32),
    #[error("range of {count} groups starting at {first} crosses the /24 boundary")]
    CrossesBoundary { first: Ipv4Addr, count: u32 },
    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),
    #[error("first octet {0} outside multicast range 224..=239")]
    NotMulticast(u8),
    #[error("deadline must be at least 1 second, got {0}")]
    InvalidDeadline(u64),
    #[error("port must be non-zero")]
    InvalidPort,
    #[error("poll interval must be non-zero")]
    InvalidPollInterval,
    #[error("interface '{0}' has no IPv4 address")]
    UnknownInterface(String),
    #[error("LEAVE measurement needs an explicit local interface")]
    LeaveNeedsInterface,
    #[error("invalid config TOML: {0}")]
    InvalidToml(String),
}

// ── Runs ────────────────────────────────────────────────────────────

/// Membership operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOp {
    Join,
    Leave,
}

impl std::fmt::Display for MembershipOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipOp::Join => f.write_str("join"),
            MembershipOp::Leave => f.write_str("leave"),
        }
    }
}

/// Fatal to the run; propagated to the caller without retry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind datagram socket: {0}")]
    Bind(#[source] io::Error),
    #[error("{op} failed for group {group}: {source}")]
    Membership {
        op: MembershipOp,
        group: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    #[error("datagram receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error("packet capture failed: {0}")]
    Capture(#[source] io::Error),
    #[error("LEAVE measurement requested but no packet capture is available")]
    CaptureUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_error_names_group_and_op() {
        let err = EngineError::Membership {
            op: MembershipOp::Leave,
            group: Ipv4Addr::new(230, 8, 97, 10),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "leave failed for group 230.8.97.10: denied"
        );
    }

    #[test]
    fn config_error_is_transparent() {
        let err: EngineError = ConfigError::InvalidCount(0).into();
        assert_eq!(err.to_string(), "group count 0 outside 1..=254");
    }
}

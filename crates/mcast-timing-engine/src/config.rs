use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::group::GroupRange;
use crate::net::iface::resolve_iface_ipv4;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DEADLINE_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_COUNT: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "join")]
    JoinOnly,
    #[serde(rename = "join-leave")]
    JoinAndLeave,
}

impl Mode {
    pub fn measures_leave(self) -> bool {
        self == Mode::JoinAndLeave
    }
}

/// Analyzer settings as read from TOML or command-line flags. Every field is
/// optional; [`AnalyzerConfigInput::resolve`] applies defaults and validates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfigInput {
    pub first_group: Option<String>,
    pub count: Option<u32>,
    pub mode: Option<Mode>,
    pub deadline_secs: Option<u64>,
    /// IPv4 address or interface name.
    pub interface: Option<String>,
    pub port: Option<u16>,
    pub poll_interval_ms: Option<u64>,
}

/// Validated settings for one measurement run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementConfig {
    pub groups: GroupRange,
    pub mode: Mode,
    pub deadline: Duration,
    pub interface: Ipv4Addr,
    pub port: u16,
    pub poll_interval: Duration,
}

impl MeasurementConfig {
    /// Config with defaults for everything except the groups.
    pub fn new(groups: GroupRange, mode: Mode) -> Self {
        Self {
            groups,
            mode,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            interface: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        AnalyzerConfigInput::from_toml_str(input)?.resolve()
    }
}

impl AnalyzerConfigInput {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(input).map_err(|e| ConfigError::InvalidToml(e.to_string()))
    }

    /// Field-wise overlay: values set in `other` win.
    pub fn merge(self, other: AnalyzerConfigInput) -> Self {
        Self {
            first_group: other.first_group.or(self.first_group),
            count: other.count.or(self.count),
            mode: other.mode.or(self.mode),
            deadline_secs: other.deadline_secs.or(self.deadline_secs),
            interface: other.interface.or(self.interface),
            port: other.port.or(self.port),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
        }
    }

    pub fn resolve(self) -> Result<MeasurementConfig, ConfigError> {
        let first = self
            .first_group
            .ok_or_else(|| ConfigError::InvalidAddress(String::new()))?;
        let groups = GroupRange::parse(&first, self.count.unwrap_or(DEFAULT_COUNT))?;

        let deadline_secs = self.deadline_secs.unwrap_or(DEFAULT_DEADLINE_SECS);
        if deadline_secs < 1 {
            return Err(ConfigError::InvalidDeadline(deadline_secs));
        }

        let port = self.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let poll_ms = self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        let interface = match self.interface.as_deref().map(str::trim) {
            None | Some("") => Ipv4Addr::UNSPECIFIED,
            Some(s) => parse_interface(s)?,
        };

        // The capture binds to the interface owning this address.
        let mode = self.mode.unwrap_or_default();
        if mode.measures_leave() && interface.is_unspecified() {
            return Err(ConfigError::LeaveNeedsInterface);
        }

        Ok(MeasurementConfig {
            groups,
            mode,
            deadline: Duration::from_secs(deadline_secs),
            interface,
            port,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

/// Accept either a dotted IPv4 address or an interface name such as `eth0`.
pub fn parse_interface(s: &str) -> Result<Ipv4Addr, ConfigError> {
    if let Ok(addr) = s.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    resolve_iface_ipv4(s).ok_or_else(|| ConfigError::UnknownInterface(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_toml_config_basic() {
        let toml = r#"
            first_group = "230.8.97.10"
            count = 3
            mode = "join-leave"
            deadline_secs = 5
            interface = "10.0.0.2"
            port = 6000
        "#;

        let cfg = MeasurementConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.groups, GroupRange::parse("230.8.97.10", 3).unwrap());
        assert_eq!(cfg.mode, Mode::JoinAndLeave);
        assert_eq!(cfg.deadline, Duration::from_secs(5));
        assert_eq!(cfg.interface, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn defaults_apply() {
        let cfg = MeasurementConfig::from_toml_str("first_group = \"239.1.1.1\"").unwrap();
        assert_eq!(cfg.mode, Mode::JoinOnly);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.groups.len(), 1);
        assert_eq!(cfg.interface, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn rejects_zero_deadline() {
        let input = AnalyzerConfigInput {
            first_group: Some("230.8.97.10".into()),
            deadline_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(input.resolve(), Err(ConfigError::InvalidDeadline(0)));
    }

    #[test]
    fn rejects_missing_group_and_bad_port() {
        assert!(matches!(
            AnalyzerConfigInput::default().resolve(),
            Err(ConfigError::InvalidAddress(_))
        ));
        let input = AnalyzerConfigInput {
            first_group: Some("230.8.97.10".into()),
            port: Some(0),
            ..Default::default()
        };
        assert_eq!(input.resolve(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn merge_prefers_overrides() {
        let file = AnalyzerConfigInput::from_toml_str(
            "first_group = \"230.8.97.10\"\ncount = 4\ndeadline_secs = 9",
        )
        .unwrap();
        let flags = AnalyzerConfigInput {
            count: Some(2),
            ..Default::default()
        };
        let cfg = file.merge(flags).resolve().unwrap();
        assert_eq!(cfg.groups.len(), 2);
        assert_eq!(cfg.deadline, Duration::from_secs(9));
    }

    #[test]
    fn leave_mode_requires_interface() {
        let input = AnalyzerConfigInput {
            first_group: Some("230.8.97.10".into()),
            count: Some(2),
            mode: Some(Mode::JoinAndLeave),
            ..Default::default()
        };
        assert_eq!(input.clone().resolve(), Err(ConfigError::LeaveNeedsInterface));

        let unspecified = AnalyzerConfigInput {
            interface: Some("0.0.0.0".into()),
            ..input.clone()
        };
        assert_eq!(unspecified.resolve(), Err(ConfigError::LeaveNeedsInterface));

        let with_lo = AnalyzerConfigInput {
            interface: Some("lo".into()),
            ..input
        };
        let cfg = with_lo.resolve().unwrap();
        assert_eq!(cfg.interface, Ipv4Addr::LOCALHOST);

        let join_only = AnalyzerConfigInput {
            first_group: Some("230.8.97.10".into()),
            ..Default::default()
        };
        assert_eq!(join_only.resolve().unwrap().interface, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(matches!(
            MeasurementConfig::from_toml_str("count = \"many\""),
            Err(ConfigError::InvalidToml(_))
        ));
    }

    #[test]
    fn interface_by_name() {
        assert_eq!(parse_interface("lo"), Ok(Ipv4Addr::LOCALHOST));
        assert_eq!(
            parse_interface("does_not_exist_xyz99"),
            Err(ConfigError::UnknownInterface("does_not_exist_xyz99".into()))
        );
    }
}

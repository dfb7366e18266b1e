use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inclusive range of TCP ports.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }

    pub fn is_well_formed(&self) -> bool {
        self.start > 0 && self.start <= self.end
    }

    /// True when every port of `other` also lies in `self`.
    pub fn covers(&self, other: &PortRange) -> bool {
        self.contains(other.start) && self.contains(other.end)
    }
}

/// Execution backend selected once at process start.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Deterministic in-memory backend for tests and demos.
    Fake,
    /// Docker compose on the local host.
    Local,
    /// Placeholder for a cluster scheduler backend.
    Cluster,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SeaORM connection string, e.g. `sqlite://rangelab.sqlite3?mode=rwc`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://rangelab.sqlite3?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub start: u16,
    pub end: u16,
    /// Bind-probe candidates on the host before handing them out.
    /// Turned off in tests and other ephemeral environments.
    pub probe_host: bool,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            start: 20000,
            end: 20999,
            probe_host: true,
        }
    }
}

impl PortsConfig {
    pub fn range(&self) -> PortRange {
        PortRange::new(self.start, self.end)
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub driver: DriverKind,
    /// Container CLI invoked by the local driver.
    pub binary: String,
    /// Root under which per-instance compose files are rendered.
    pub workdir: PathBuf,
    /// Upper bound for liveness probes against the runtime.
    pub probe_timeout_secs: u64,
    /// Upper bound for lifecycle commands (`up`, `stop`, `down`, ...).
    pub command_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::Local,
            binary: "docker".to_string(),
            workdir: PathBuf::from("/var/lib/rangelab/instances"),
            probe_timeout_secs: 5,
            command_timeout_secs: 300,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicAccessConfig {
    /// `direct` or `proxy`; kept as text so a typo degrades to `direct`
    /// while preflight still reports it.
    pub mode: String,
    pub scheme: String,
    /// Explicit public host for direct mode.
    pub host: Option<String>,
    /// Base URL of the reverse proxy for proxy mode.
    pub base_url: String,
    pub proxy_prefix: String,
    /// Base URL of the platform itself, last resort for the public host.
    pub app_base_url: Option<String>,
    pub allowed_port_start: u16,
    pub allowed_port_end: u16,
}

impl Default for PublicAccessConfig {
    fn default() -> Self {
        let ports = PortsConfig::default();
        Self {
            mode: "direct".to_string(),
            scheme: "http".to_string(),
            host: None,
            base_url: String::new(),
            proxy_prefix: "labs".to_string(),
            app_base_url: None,
            allowed_port_start: ports.start,
            allowed_port_end: ports.end,
        }
    }
}

impl PublicAccessConfig {
    pub fn allowed_range(&self) -> PortRange {
        PortRange::new(self.allowed_port_start, self.allowed_port_end)
    }
}

/// Longest accepted instance lifetime: one year.
pub const MAX_TTL_MINUTES: u64 = 365 * 24 * 60;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Lifetime of an activation; `0` disables expiry. At most
    /// [`MAX_TTL_MINUTES`].
    pub ttl_minutes: u64,
    /// Run preflight before every activation.
    pub require_preflight: bool,
    /// Number of log lines returned by the admin inspector.
    pub inspect_log_lines: usize,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 240,
            require_preflight: true,
            inspect_log_lines: 100,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_bounds_are_inclusive() {
        let range = PortRange::new(20000, 20002);
        assert!(range.contains(20000));
        assert!(range.contains(20002));
        assert!(!range.contains(20003));
        assert!(!range.contains(19999));
    }

    #[test]
    fn port_range_cover_and_shape() {
        let public = PortRange::new(20000, 21000);
        assert!(public.covers(&PortRange::new(20000, 20010)));
        assert!(!public.covers(&PortRange::new(19990, 20010)));
        assert!(!PortRange::new(5, 4).is_well_formed());
        assert!(!PortRange::new(0, 4).is_well_formed());
    }
}

use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "RANGELAB_DATABASE_URL";
/// Environment variable overriding `public.host`.
pub const PUBLIC_HOST_ENV: &str = "RANGELAB_PUBLIC_HOST";

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file whose sections map one-to-one to
/// the fields below. Every section is optional and falls back to its
/// `Default`, so a minimal file only needs the values that differ:
///
/// ```toml
/// [ports]
/// start = 30000
/// end = 30100
///
/// [runtime]
/// driver = "local"
/// workdir = "/srv/rangelab"
///
/// [public]
/// mode = "proxy"
/// base_url = "https://labs.example.org"
/// ```
///
/// # Fields Overview
///
/// - `database`: where the template, instance and port ledgers live
/// - `ports`: the host port range handed out by the allocator
/// - `runtime`: which execution backend runs instances and how it is invoked
/// - `public`: how an allocated port becomes an externally reachable URL
/// - `instances`: activation lifetime and preflight policy
/// - `web`: the HTTP surface
///
/// The configuration is injected into each component at construction; nothing
/// reads it from global state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ports: PortsConfig,
    pub runtime: RuntimeConfig,
    pub public: PublicAccessConfig,
    pub instances: InstanceConfig,
    pub web: WebConfig,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`,
    /// then applies environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML text without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Applies `RANGELAB_DATABASE_URL` and `RANGELAB_PUBLIC_HOST` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                debug!("Overriding database url from {}", DATABASE_URL_ENV);
                self.database.url = url;
            }
        }
        if let Ok(host) = std::env::var(PUBLIC_HOST_ENV) {
            if !host.trim().is_empty() {
                debug!("Overriding public host from {}", PUBLIC_HOST_ENV);
                self.public.host = Some(host);
            }
        }
    }

    /// Structural validation. Public-endpoint consistency (mode, base URL) is
    /// left to preflight so that it can be reported with remediation hints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ports.range().is_well_formed() {
            return Err(ConfigError::BadPortsRange(format!(
                "ports.start ({}) must be non-zero and not greater than ports.end ({})",
                self.ports.start, self.ports.end
            )));
        }
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "database.url must not be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.runtime.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "runtime.binary must not be empty".to_string(),
            ));
        }
        if self.runtime.probe_timeout_secs == 0 || self.runtime.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "runtime timeouts must be at least one second".to_string(),
            ));
        }
        if self.instances.ttl_minutes > MAX_TTL_MINUTES {
            return Err(ConfigError::InvalidValue(format!(
                "instances.ttl_minutes ({}) must not exceed {}",
                self.instances.ttl_minutes, MAX_TTL_MINUTES
            )));
        }
        if self.instances.inspect_log_lines == 0 {
            return Err(ConfigError::InvalidValue(
                "instances.inspect_log_lines must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
        [database]
        url = "sqlite://labs.sqlite3?mode=rwc"

        [ports]
        start = 30000
        end = 30010
        probe_host = false

        [runtime]
        driver = "fake"
        workdir = "/srv/rangelab"

        [public]
        mode = "proxy"
        base_url = "https://labs.example.org"
        allowed_port_start = 30000
        allowed_port_end = 30010

        [instances]
        ttl_minutes = 0
    "#;

    #[test]
    fn test_parse_sample_configuration() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.database.url, "sqlite://labs.sqlite3?mode=rwc");
        assert_eq!(config.ports.range(), PortRange::new(30000, 30010));
        assert!(!config.ports.probe_host);
        assert_eq!(config.runtime.driver, DriverKind::Fake);
        assert_eq!(config.runtime.workdir, PathBuf::from("/srv/rangelab"));
        // untouched keys keep their defaults
        assert_eq!(config.runtime.binary, "docker");
        assert_eq!(config.public.mode, "proxy");
        assert_eq!(config.public.proxy_prefix, "labs");
        assert_eq!(config.instances.ttl_minutes, 0);
        assert!(config.instances.require_preflight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_driver_is_rejected() {
        let err = Config::from_toml_str("[runtime]\ndriver = \"kubernetes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_inverted_port_range_fails_validation() {
        let mut config = Config::default();
        config.ports.start = 21000;
        config.ports.end = 20000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadPortsRange(_))
        ));
    }

    #[test]
    fn test_oversized_ttl_fails_validation() {
        let mut config = Config::default();
        config.instances.ttl_minutes = MAX_TTL_MINUTES;
        assert!(config.validate().is_ok());

        config.instances.ttl_minutes = 1 << 40;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_file_applies_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        std::env::set_var(DATABASE_URL_ENV, "sqlite::memory:");
        std::env::set_var(PUBLIC_HOST_ENV, "range.example.org");
        let config = Config::from_file(file.path());
        std::env::remove_var(DATABASE_URL_ENV);
        std::env::remove_var(PUBLIC_HOST_ENV);

        let config = config.unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.public.host.as_deref(), Some("range.example.org"));
    }

    #[test]
    #[serial]
    fn test_from_file_missing_path() {
        let err = Config::from_file(Path::new("/nonexistent/rangelab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}

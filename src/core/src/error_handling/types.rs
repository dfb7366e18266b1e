use std::fmt;

use sea_orm::DbErr;

use crate::preflight::PreflightReport;

/// Coarse classification used by callers to decide how to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator misconfiguration, never retried.
    Configuration,
    /// Contended resource exhausted or uniqueness clash; may be retried later.
    Conflict,
    /// Execution backend failure for the current call.
    Runtime,
    /// A domain rule was violated by the request.
    Domain,
    NotFound,
    Forbidden,
    Storage,
}

impl ErrorKind {
    /// HTTP status equivalent of the category.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Configuration => 500,
            ErrorKind::Conflict => 409,
            ErrorKind::Runtime => 502,
            ErrorKind::Domain => 422,
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::Storage => 500,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadPortsRange(String),
    UnknownDriver(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::UnknownDriver(e) => write!(f, "Unknown execution driver: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    WriteFailed(String),
    ReadFailed(String),
    /// A persisted value could not be decoded back into its domain type.
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::Corrupt(e) => write!(f, "Corrupt stored value: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::Conn(e) => StorageError::ConnectionFailed(e.to_string()),
            DbErr::RecordNotFound(e) => StorageError::ReadFailed(e),
            DbErr::Json(e) => StorageError::Corrupt(e),
            other => StorageError::WriteFailed(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum PortError {
    /// Every port of the configured range is claimed or locally occupied.
    Exhausted { start: u16, end: u16 },
    InvalidRange { start: u16, end: u16 },
    StorageError(StorageError),
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Exhausted { start, end } => {
                write!(f, "No free port left in range {}-{}", start, end)
            }
            PortError::InvalidRange { start, end } => {
                write!(f, "Invalid port range {}-{}", start, end)
            }
            PortError::StorageError(e) => write!(f, "Port ledger error: {}", e),
        }
    }
}

impl std::error::Error for PortError {}

impl From<StorageError> for PortError {
    fn from(err: StorageError) -> Self {
        PortError::StorageError(err)
    }
}

impl From<DbErr> for PortError {
    fn from(err: DbErr) -> Self {
        PortError::StorageError(err.into())
    }
}

impl PortError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortError::Exhausted { .. } => ErrorKind::Conflict,
            PortError::InvalidRange { .. } => ErrorKind::Configuration,
            PortError::StorageError(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug)]
pub enum DriverError {
    /// The selected backend does not implement orchestration yet.
    NotImplemented(String),
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    SpawnFailed { command: String, reason: String },
    Timeout { command: String, secs: u64 },
    RenderFailed(String),
    /// No container reference is known for the instance.
    NoContainer(String),
    IoError(std::io::Error),
    /// Failure injected into the fake backend.
    Simulated(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::NotImplemented(e) => write!(f, "Driver operation not implemented: {}", e),
            DriverError::CommandFailed {
                command,
                code,
                stderr,
            } => match code {
                Some(code) => write!(
                    f,
                    "Runtime command `{}` exited with status {}: {}",
                    command,
                    code,
                    stderr.trim()
                ),
                None => write!(
                    f,
                    "Runtime command `{}` was terminated by a signal: {}",
                    command,
                    stderr.trim()
                ),
            },
            DriverError::SpawnFailed { command, reason } => {
                write!(f, "Unable to run `{}`: {}", command, reason)
            }
            DriverError::Timeout { command, secs } => {
                write!(f, "Runtime command `{}` timed out after {}s", command, secs)
            }
            DriverError::RenderFailed(e) => write!(f, "Unable to render runtime definition: {}", e),
            DriverError::NoContainer(id) => {
                write!(f, "No runtime container is known for instance {}", id)
            }
            DriverError::IoError(e) => write!(f, "Driver IO error: {}", e),
            DriverError::Simulated(e) => write!(f, "Simulated driver failure: {}", e),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::IoError(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    PortOutOfRange { port: u16, start: u16, end: u16 },
    MissingBaseUrl,
    InvalidBaseUrl(String),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::PortOutOfRange { port, start, end } => write!(
                f,
                "Host port {} is outside the public range {}-{}",
                port, start, end
            ),
            AccessError::MissingBaseUrl => {
                write!(f, "Proxy exposure requires a non-empty public base URL")
            }
            AccessError::InvalidBaseUrl(e) => write!(f, "Invalid public base URL: {}", e),
        }
    }
}

impl std::error::Error for AccessError {}

#[derive(Debug)]
pub enum PreflightError {
    /// At least one check failed; carries every sub-report.
    NotReady(Box<PreflightReport>),
}

impl fmt::Display for PreflightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreflightError::NotReady(report) => {
                write!(f, "Environment is not ready:")?;
                for (name, check) in report.checks() {
                    if !check.ok {
                        write!(f, " [{}] {}", name, check.message)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for PreflightError {}

#[derive(Debug)]
pub enum TemplateError {
    NotFound(String),
    VersionExists { family: String, version: String },
    InvalidVersion(String),
    /// Published and archived rows are read-only.
    Immutable(String),
    InvalidInput(String),
    StorageError(StorageError),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::NotFound(id) => write!(f, "Lab template {} not found", id),
            TemplateError::VersionExists { family, version } => write!(
                f,
                "Version {} already exists in template family {}",
                version, family
            ),
            TemplateError::InvalidVersion(v) => {
                write!(f, "'{}' is not a semantic version (expected MAJOR.MINOR.PATCH)", v)
            }
            TemplateError::Immutable(id) => {
                write!(f, "Lab template {} is not a draft and cannot be edited", id)
            }
            TemplateError::InvalidInput(e) => write!(f, "Invalid template: {}", e),
            TemplateError::StorageError(e) => write!(f, "Template storage error: {}", e),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<StorageError> for TemplateError {
    fn from(err: StorageError) -> Self {
        TemplateError::StorageError(err)
    }
}

impl From<DbErr> for TemplateError {
    fn from(err: DbErr) -> Self {
        TemplateError::StorageError(err.into())
    }
}

impl TemplateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TemplateError::NotFound(_) => ErrorKind::NotFound,
            TemplateError::VersionExists { .. } => ErrorKind::Conflict,
            TemplateError::InvalidVersion(_)
            | TemplateError::Immutable(_)
            | TemplateError::InvalidInput(_) => ErrorKind::Domain,
            TemplateError::StorageError(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug)]
pub enum InstanceError {
    NotFound(String),
    Forbidden { instance_id: String, user_id: String },
    AdminRequired,
    TemplateNotActivatable { template_id: String, status: String },
    NoPublishedTarget(String),
    IncompatibleUpgrade(String),
    FamilyConflict { family: String },
    ExpiryOutOfRange(u64),
    PreflightError(PreflightError),
    PortError(PortError),
    DriverError(DriverError),
    AccessError(AccessError),
    TemplateError(TemplateError),
    StorageError(StorageError),
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceError::NotFound(id) => write!(f, "Lab instance {} not found", id),
            InstanceError::Forbidden {
                instance_id,
                user_id,
            } => write!(
                f,
                "Lab instance {} does not belong to user {}",
                instance_id, user_id
            ),
            InstanceError::AdminRequired => write!(f, "Administrator privileges required"),
            InstanceError::TemplateNotActivatable {
                template_id,
                status,
            } => write!(
                f,
                "Lab template {} is {} and cannot back a new instance",
                template_id, status
            ),
            InstanceError::NoPublishedTarget(family) => write!(
                f,
                "No published version available to upgrade to in family {}",
                family
            ),
            InstanceError::IncompatibleUpgrade(e) => write!(f, "Incompatible upgrade: {}", e),
            InstanceError::FamilyConflict { family } => write!(
                f,
                "User already owns an instance in template family {}",
                family
            ),
            InstanceError::ExpiryOutOfRange(minutes) => write!(
                f,
                "An instance lifetime of {} minutes is out of range",
                minutes
            ),
            InstanceError::PreflightError(e) => write!(f, "{}", e),
            InstanceError::PortError(e) => write!(f, "{}", e),
            InstanceError::DriverError(e) => write!(f, "{}", e),
            InstanceError::AccessError(e) => write!(f, "{}", e),
            InstanceError::TemplateError(e) => write!(f, "{}", e),
            InstanceError::StorageError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for InstanceError {}

impl InstanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstanceError::NotFound(_) => ErrorKind::NotFound,
            InstanceError::Forbidden { .. } | InstanceError::AdminRequired => ErrorKind::Forbidden,
            InstanceError::TemplateNotActivatable { .. }
            | InstanceError::NoPublishedTarget(_)
            | InstanceError::IncompatibleUpgrade(_) => ErrorKind::Domain,
            InstanceError::FamilyConflict { .. } => ErrorKind::Conflict,
            InstanceError::PreflightError(_) | InstanceError::ExpiryOutOfRange(_) => {
                ErrorKind::Configuration
            }
            InstanceError::PortError(e) => e.kind(),
            InstanceError::DriverError(_) => ErrorKind::Runtime,
            InstanceError::AccessError(_) => ErrorKind::Configuration,
            InstanceError::TemplateError(e) => e.kind(),
            InstanceError::StorageError(_) => ErrorKind::Storage,
        }
    }
}

impl From<PreflightError> for InstanceError {
    fn from(err: PreflightError) -> Self {
        InstanceError::PreflightError(err)
    }
}

impl From<PortError> for InstanceError {
    fn from(err: PortError) -> Self {
        InstanceError::PortError(err)
    }
}

impl From<DriverError> for InstanceError {
    fn from(err: DriverError) -> Self {
        InstanceError::DriverError(err)
    }
}

impl From<AccessError> for InstanceError {
    fn from(err: AccessError) -> Self {
        InstanceError::AccessError(err)
    }
}

impl From<TemplateError> for InstanceError {
    fn from(err: TemplateError) -> Self {
        InstanceError::TemplateError(err)
    }
}

impl From<StorageError> for InstanceError {
    fn from(err: StorageError) -> Self {
        InstanceError::StorageError(err)
    }
}

impl From<DbErr> for InstanceError {
    fn from(err: DbErr) -> Self {
        InstanceError::StorageError(err.into())
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    InitializationFailed(String),
    InstanceError(InstanceError),
    WebError(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
            ControllerError::InstanceError(e) => write!(f, "Instance operation failed: {}", e),
            ControllerError::WebError(e) => write!(f, "Web interface error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<InstanceError> for ControllerError {
    fn from(err: InstanceError) -> Self {
        ControllerError::InstanceError(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_range_is_a_conflict() {
        let err = InstanceError::from(PortError::Exhausted {
            start: 20000,
            end: 20001,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.kind().status_code(), 409);
        assert!(err.to_string().contains("20000-20001"));
    }

    #[test]
    fn missing_template_surfaces_as_not_found() {
        let err = InstanceError::from(TemplateError::NotFound("t-1".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().status_code(), 404);
    }

    #[test]
    fn command_failure_message_keeps_stderr() {
        let err = DriverError::CommandFailed {
            command: "docker compose up -d".into(),
            code: Some(1),
            stderr: "no such image\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "Runtime command `docker compose up -d` exited with status 1: no such image"
        );
    }
}

pub mod config;
pub mod types;

pub use config::Config;
pub use types::{
    DatabaseConfig, DriverKind, InstanceConfig, PortRange, PortsConfig, PublicAccessConfig,
    RuntimeConfig, WebConfig,
};

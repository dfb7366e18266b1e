//! Execution drivers.
//!
//! This module is the only place that talks to a container runtime. The
//! backend is picked once from `runtime.driver`:
//! - [`FakeDriver`]: deterministic, in memory, for tests and demos.
//! - [`LocalRuntime`]: `docker compose` projects on the local host.
//! - [`ClusterDriver`]: placeholder that refuses every call.
//!
//! Example (non-running):
//! ```ignore
//! use rangelab::configuration::{DriverKind, RuntimeConfig};
//! use rangelab::container_management::ExecutionDriver;
//!
//! let driver = ExecutionDriver::from_config(&RuntimeConfig {
//!     driver: DriverKind::Fake,
//!     ..Default::default()
//! });
//! let output = driver.start(&instance, &template, 20000).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cluster;
pub mod driver;
pub mod fake;
#[cfg(test)]
pub mod integration_tests;
pub mod local_runtime;
#[cfg(test)]
pub mod tests;
pub mod types;

pub use cluster::ClusterDriver;
pub use driver::ExecutionDriver;
pub use fake::FakeDriver;
pub use local_runtime::LocalRuntime;
pub use types::{
    DriverOperation, LiveStatus, RuntimeDescriptor, RuntimeMetadata, RuntimeOutput,
    UpgradeStrategy,
};

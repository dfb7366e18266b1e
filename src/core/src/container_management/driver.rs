use log::info;
use std::time::Duration;

use crate::configuration::{DriverKind, RuntimeConfig};
use crate::container_management::cluster::ClusterDriver;
use crate::container_management::fake::FakeDriver;
use crate::container_management::local_runtime::LocalRuntime;
use crate::container_management::types::{LiveStatus, RuntimeOutput, UpgradeStrategy};
use crate::error_handling::types::DriverError;
use crate::instance_management::LabInstance;
use crate::template_management::LabTemplate;

/// Execution backend, chosen once from configuration at startup.
///
/// Callers only ever see this enum; each operation dispatches on the
/// variant so every backend honours the same contract.
#[derive(Debug)]
pub enum ExecutionDriver {
    Fake(FakeDriver),
    LocalRuntime(LocalRuntime),
    Cluster(ClusterDriver),
}

impl ExecutionDriver {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let driver = match config.driver {
            DriverKind::Fake => ExecutionDriver::Fake(FakeDriver::new()),
            DriverKind::Local => ExecutionDriver::LocalRuntime(LocalRuntime::new(config)),
            DriverKind::Cluster => ExecutionDriver::Cluster(ClusterDriver),
        };
        info!("Execution driver selected: {:?}", driver.kind());
        driver
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            ExecutionDriver::Fake(_) => DriverKind::Fake,
            ExecutionDriver::LocalRuntime(_) => DriverKind::Local,
            ExecutionDriver::Cluster(_) => DriverKind::Cluster,
        }
    }

    /// The fake backend, when selected. Used by tests and demos to inject
    /// failures and read the call journal.
    pub fn as_fake(&self) -> Option<&FakeDriver> {
        match self {
            ExecutionDriver::Fake(fake) => Some(fake),
            _ => None,
        }
    }

    pub async fn start(
        &self,
        instance: &LabInstance,
        template: &LabTemplate,
        port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.start(instance, template, port).await,
            ExecutionDriver::LocalRuntime(d) => d.start(instance, template, port).await,
            ExecutionDriver::Cluster(d) => d.start(instance, template, port).await,
        }
    }

    pub async fn stop(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.stop(instance).await,
            ExecutionDriver::LocalRuntime(d) => d.stop(instance).await,
            ExecutionDriver::Cluster(d) => d.stop(instance).await,
        }
    }

    pub async fn restart(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.restart(instance).await,
            ExecutionDriver::LocalRuntime(d) => d.restart(instance).await,
            ExecutionDriver::Cluster(d) => d.restart(instance).await,
        }
    }

    pub async fn destroy(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.destroy(instance).await,
            ExecutionDriver::LocalRuntime(d) => d.destroy(instance).await,
            ExecutionDriver::Cluster(d) => d.destroy(instance).await,
        }
    }

    pub async fn upgrade(
        &self,
        instance: &LabInstance,
        target: &LabTemplate,
        strategy: UpgradeStrategy,
        port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.upgrade(instance, target, strategy, port).await,
            ExecutionDriver::LocalRuntime(d) => d.upgrade(instance, target, strategy, port).await,
            ExecutionDriver::Cluster(d) => d.upgrade(instance, target, strategy, port).await,
        }
    }

    pub async fn inspect(&self, instance: &LabInstance) -> Result<LiveStatus, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.inspect(instance).await,
            ExecutionDriver::LocalRuntime(d) => d.inspect(instance).await,
            ExecutionDriver::Cluster(d) => d.inspect(instance).await,
        }
    }

    pub async fn stats(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.stats(instance).await,
            ExecutionDriver::LocalRuntime(d) => d.stats(instance).await,
            ExecutionDriver::Cluster(d) => d.stats(instance).await,
        }
    }

    pub async fn logs(&self, instance: &LabInstance, tail: usize) -> Result<Vec<String>, DriverError> {
        match self {
            ExecutionDriver::Fake(d) => d.logs(instance, tail).await,
            ExecutionDriver::LocalRuntime(d) => d.logs(instance, tail).await,
            ExecutionDriver::Cluster(d) => d.logs(instance, tail).await,
        }
    }

    /// Liveness query used by preflight.
    pub async fn probe(&self, limit: Duration) -> Result<String, DriverError> {
        match self {
            ExecutionDriver::Fake(_) => Ok("fake".to_string()),
            ExecutionDriver::LocalRuntime(d) => d.probe(limit).await,
            ExecutionDriver::Cluster(d) => d.probe().await,
        }
    }
}

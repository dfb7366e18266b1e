use log::warn;

use crate::container_management::types::{LiveStatus, RuntimeOutput, UpgradeStrategy};
use crate::error_handling::types::DriverError;
use crate::instance_management::LabInstance;
use crate::template_management::LabTemplate;

/// Cluster scheduler backend. Selectable, but every call fails until a
/// scheduler integration exists.
#[derive(Debug, Default, Clone)]
pub struct ClusterDriver;

impl ClusterDriver {
    fn unsupported<T>(operation: &str, instance: &LabInstance) -> Result<T, DriverError> {
        warn!(
            "Cluster driver asked to {} instance {}; backend is not implemented",
            operation, instance.id
        );
        Err(DriverError::NotImplemented(format!(
            "cluster backend cannot {} yet",
            operation
        )))
    }

    pub async fn start(
        &self,
        instance: &LabInstance,
        _template: &LabTemplate,
        _port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        Self::unsupported("start", instance)
    }

    pub async fn stop(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        Self::unsupported("stop", instance)
    }

    pub async fn restart(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        Self::unsupported("restart", instance)
    }

    pub async fn destroy(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        Self::unsupported("destroy", instance)
    }

    pub async fn upgrade(
        &self,
        instance: &LabInstance,
        _target: &LabTemplate,
        _strategy: UpgradeStrategy,
        _port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        Self::unsupported("upgrade", instance)
    }

    pub async fn inspect(&self, instance: &LabInstance) -> Result<LiveStatus, DriverError> {
        Self::unsupported("inspect", instance)
    }

    pub async fn stats(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        Self::unsupported("report stats for", instance)
    }

    pub async fn logs(&self, instance: &LabInstance, _tail: usize) -> Result<Vec<String>, DriverError> {
        Self::unsupported("read logs of", instance)
    }

    pub async fn probe(&self) -> Result<String, DriverError> {
        Err(DriverError::NotImplemented(
            "cluster backend has no liveness probe".to_string(),
        ))
    }
}

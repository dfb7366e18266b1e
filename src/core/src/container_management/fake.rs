use log::debug;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::container_management::types::{
    DriverOperation, LiveStatus, RuntimeOutput, UpgradeStrategy,
};
use crate::error_handling::types::DriverError;
use crate::instance_management::LabInstance;
use crate::template_management::LabTemplate;

/// In-memory backend that never touches a container runtime.
///
/// Outputs are derived only from their inputs, so repeated runs produce the
/// same metadata. Every call is journaled as `"<op>:<instance-id>"` and any
/// operation can be made to fail with [`FakeDriver::fail_on`].
#[derive(Debug, Default)]
pub struct FakeDriver {
    journal: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    running: Mutex<HashMap<String, bool>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `operation` fail.
    pub fn fail_on(&self, operation: DriverOperation) {
        guard(&self.failing).insert(operation.as_str());
    }

    pub fn clear_failures(&self) {
        guard(&self.failing).clear();
    }

    /// Calls seen so far, oldest first.
    pub fn journal(&self) -> Vec<String> {
        guard(&self.journal).clone()
    }

    fn enter(&self, operation: DriverOperation, instance: &LabInstance) -> Result<(), DriverError> {
        guard(&self.journal).push(format!("{}:{}", operation, instance.id));
        debug!("[fake] {} {}", operation, instance.id);
        if guard(&self.failing).contains(operation.as_str()) {
            return Err(DriverError::Simulated(format!(
                "{} of instance {}",
                operation, instance.id
            )));
        }
        Ok(())
    }

    fn set_running(&self, instance: &LabInstance, running: bool) {
        guard(&self.running).insert(instance.id.clone(), running);
    }

    fn container(instance: &LabInstance) -> String {
        format!("fake-{}", instance.id)
    }

    pub async fn start(
        &self,
        instance: &LabInstance,
        template: &LabTemplate,
        port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        self.enter(DriverOperation::Start, instance)?;
        self.set_running(instance, true);
        Ok(json!({
            "driver": "fake",
            "container": Self::container(instance),
            "image": template.execution.image,
            "template_version": template.version,
            "host_port": port,
            "internal_port": template.execution.internal_port,
        }))
    }

    pub async fn stop(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        self.enter(DriverOperation::Stop, instance)?;
        self.set_running(instance, false);
        Ok(json!({ "driver": "fake", "container": Self::container(instance), "stopped": true }))
    }

    pub async fn restart(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        self.enter(DriverOperation::Restart, instance)?;
        self.set_running(instance, true);
        Ok(json!({ "driver": "fake", "container": Self::container(instance), "restarted": true }))
    }

    pub async fn destroy(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        self.enter(DriverOperation::Destroy, instance)?;
        guard(&self.running).remove(&instance.id);
        Ok(json!({ "driver": "fake", "container": Self::container(instance), "removed": true }))
    }

    pub async fn upgrade(
        &self,
        instance: &LabInstance,
        target: &LabTemplate,
        strategy: UpgradeStrategy,
        port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        self.enter(DriverOperation::Upgrade, instance)?;
        self.set_running(instance, true);
        Ok(json!({
            "driver": "fake",
            "container": Self::container(instance),
            "strategy": strategy.as_str(),
            "image": target.execution.image,
            "template_version": target.version,
            "host_port": port,
            "volumes_kept": strategy == UpgradeStrategy::InPlace,
        }))
    }

    pub async fn inspect(&self, instance: &LabInstance) -> Result<LiveStatus, DriverError> {
        let status = match guard(&self.running).get(&instance.id) {
            Some(true) => "running",
            Some(false) => "exited",
            None => return Err(DriverError::NoContainer(instance.id.clone())),
        };
        Ok(LiveStatus {
            status: status.to_string(),
            details: json!({ "driver": "fake", "container": Self::container(instance) }),
        })
    }

    pub async fn stats(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        Ok(json!({
            "container": Self::container(instance),
            "cpu_percent": "0.00%",
            "mem_usage": "0B / 0B",
        }))
    }

    pub async fn logs(&self, instance: &LabInstance, tail: usize) -> Result<Vec<String>, DriverError> {
        let lines: Vec<String> = self
            .journal()
            .into_iter()
            .filter(|entry| entry.ends_with(&instance.id))
            .collect();
        let skip = lines.len().saturating_sub(tail);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

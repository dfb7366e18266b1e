//! Core types shared by the execution drivers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Opaque driver output for one call; always a JSON object.
pub type RuntimeOutput = Value;

/// Lifecycle operations whose output is kept on the instance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOperation {
    Start,
    Stop,
    Restart,
    Upgrade,
    Destroy,
}

impl DriverOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverOperation::Start => "start",
            DriverOperation::Stop => "stop",
            DriverOperation::Restart => "restart",
            DriverOperation::Upgrade => "upgrade",
            DriverOperation::Destroy => "destroy",
        }
    }
}

impl fmt::Display for DriverOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an instance moves to a new template version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStrategy {
    /// Keep volumes and progress; requires a compatible target.
    InPlace,
    /// Wipe volumes and progress before bringing the target up.
    Reset,
}

impl UpgradeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeStrategy::InPlace => "IN_PLACE",
            UpgradeStrategy::Reset => "RESET",
        }
    }
}

impl FromStr for UpgradeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN_PLACE" | "INPLACE" => Ok(UpgradeStrategy::InPlace),
            "RESET" => Ok(UpgradeStrategy::Reset),
            other => Err(format!("unknown upgrade strategy '{}'", other)),
        }
    }
}

/// Driver outputs of an instance, keyed by operation name.
///
/// Each operation overwrites only its own key so the last output of every
/// other operation stays available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeMetadata(Map<String, Value>);

impl RuntimeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, operation: DriverOperation, output: RuntimeOutput) {
        self.0.insert(operation.as_str().to_string(), output);
    }

    pub fn get(&self, operation: DriverOperation) -> Option<&Value> {
        self.0.get(operation.as_str())
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Container the runtime knows the instance by. Once an upgrade has been
    /// recorded only its output counts, even when it names no container.
    pub fn container_ref(&self) -> Option<&str> {
        self.get(DriverOperation::Upgrade)
            .or_else(|| self.get(DriverOperation::Start))
            .and_then(|output| output.get("container"))
            .and_then(Value::as_str)
    }
}

/// Where the local runtime keeps everything that belongs to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeDescriptor {
    pub project: String,
    pub container_name: String,
    pub network: String,
    pub directory: PathBuf,
    pub compose_file: PathBuf,
}

impl RuntimeDescriptor {
    pub fn for_instance(workdir: &Path, instance_id: &str) -> Self {
        let project = format!("lab-{}", instance_id);
        let directory = workdir.join(instance_id);
        Self {
            container_name: format!("{}-app", project),
            network: format!("{}-net", project),
            compose_file: directory.join("docker-compose.yml"),
            directory,
            project,
        }
    }
}

/// Live view of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStatus {
    /// Runtime status word, e.g. `running` or `exited`.
    pub status: String,
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_keeps_every_operation() {
        let mut meta = RuntimeMetadata::new();
        meta.record(DriverOperation::Start, json!({"container": "c1"}));
        meta.record(DriverOperation::Stop, json!({"stopped": true}));
        meta.record(DriverOperation::Start, json!({"container": "c2"}));

        assert_eq!(meta.get(DriverOperation::Stop), Some(&json!({"stopped": true})));
        assert_eq!(meta.container_ref(), Some("c2"));

        meta.record(DriverOperation::Upgrade, json!({"container": "c3"}));
        assert_eq!(meta.container_ref(), Some("c3"));

        let raw = serde_json::to_string(&meta).unwrap();
        assert!(raw.starts_with('{'));
        assert!(raw.contains("\"stop\""));
    }

    #[test]
    fn test_upgrade_without_container_hides_the_started_one() {
        let mut meta = RuntimeMetadata::new();
        meta.record(DriverOperation::Start, json!({"container": "lab-abc-app"}));
        meta.record(DriverOperation::Upgrade, json!({"container": null}));
        assert_eq!(meta.container_ref(), None);
    }

    #[test]
    fn test_descriptor_layout() {
        let d = RuntimeDescriptor::for_instance(Path::new("/srv/labs"), "abc");
        assert_eq!(d.project, "lab-abc");
        assert_eq!(d.container_name, "lab-abc-app");
        assert_eq!(d.compose_file, PathBuf::from("/srv/labs/abc/docker-compose.yml"));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("reset".parse::<UpgradeStrategy>(), Ok(UpgradeStrategy::Reset));
        assert_eq!("IN_PLACE".parse::<UpgradeStrategy>(), Ok(UpgradeStrategy::InPlace));
        assert!("rolling".parse::<UpgradeStrategy>().is_err());
    }
}

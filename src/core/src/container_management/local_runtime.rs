use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::configuration::RuntimeConfig;
use crate::container_management::types::{
    LiveStatus, RuntimeDescriptor, RuntimeOutput, UpgradeStrategy,
};
use crate::error_handling::types::DriverError;
use crate::instance_management::LabInstance;
use crate::template_management::types::{ExecutionConfig, HOST_PORT_PLACEHOLDER};
use crate::template_management::LabTemplate;

/// Captured output of a runtime command that exited successfully.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Drives labs through `<binary> compose` on the local host.
///
/// Every instance gets its own compose project `lab-<id>` whose definition
/// lives under `<workdir>/<id>/docker-compose.yml`. The lab port is always
/// published on all interfaces since learners connect from other machines.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    binary: String,
    workdir: PathBuf,
    command_timeout: Duration,
}

impl LocalRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            workdir: config.workdir.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn descriptor(&self, instance_id: &str) -> RuntimeDescriptor {
        RuntimeDescriptor::for_instance(&self.workdir, instance_id)
    }

    /// Produces the compose definition for `template` bound to host `port`.
    ///
    /// A template-supplied descriptor wins over the generated single-service
    /// form; it must reference the host port through the placeholder.
    pub fn render(
        &self,
        descriptor: &RuntimeDescriptor,
        template: &LabTemplate,
        port: u16,
    ) -> Result<String, DriverError> {
        let execution = &template.execution;
        match execution.compose_descriptor() {
            Some(compose) => render_descriptor(compose, port),
            None => render_single_service(descriptor, execution, port),
        }
    }

    pub async fn start(
        &self,
        instance: &LabInstance,
        template: &LabTemplate,
        port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        let descriptor = self.descriptor(&instance.id);
        info!(
            "Starting lab instance {} ({} v{}) on host port {}",
            instance.id, template.slug, template.version, port
        );

        // A project left behind by a crashed run may or may not exist. Its
        // removal is best effort and must never fail the start itself.
        if let Err(e) = self.teardown(&descriptor).await {
            debug!("Pre-start cleanup of {} skipped: {}", descriptor.project, e);
        }

        let rendered = self.render(&descriptor, template, port)?;
        self.write_definition(&descriptor, &rendered).await?;
        self.compose(&descriptor, &["up", "-d", "--remove-orphans"])
            .await?;

        info!("Lab instance {} is up as project {}", instance.id, descriptor.project);
        Ok(self.describe(&descriptor, template, port))
    }

    pub async fn stop(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        let descriptor = self.descriptor(&instance.id);
        self.compose(&descriptor, &["stop"]).await?;
        info!("Stopped lab instance {}", instance.id);
        Ok(json!({ "driver": "local", "project": descriptor.project, "stopped": true }))
    }

    pub async fn restart(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        let descriptor = self.descriptor(&instance.id);
        self.compose(&descriptor, &["restart"]).await?;
        info!("Restarted lab instance {}", instance.id);
        Ok(json!({ "driver": "local", "project": descriptor.project, "restarted": true }))
    }

    pub async fn destroy(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        let descriptor = self.descriptor(&instance.id);
        self.teardown(&descriptor).await?;
        match tokio::fs::remove_dir_all(&descriptor.directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Destroyed lab instance {}", instance.id);
        Ok(json!({ "driver": "local", "project": descriptor.project, "removed": true }))
    }

    pub async fn upgrade(
        &self,
        instance: &LabInstance,
        target: &LabTemplate,
        strategy: UpgradeStrategy,
        port: u16,
    ) -> Result<RuntimeOutput, DriverError> {
        let descriptor = self.descriptor(&instance.id);
        info!(
            "Upgrading lab instance {} to {} v{} ({})",
            instance.id,
            target.slug,
            target.version,
            strategy.as_str()
        );

        if strategy == UpgradeStrategy::Reset {
            self.teardown(&descriptor).await?;
        }

        let rendered = self.render(&descriptor, target, port)?;
        self.write_definition(&descriptor, &rendered).await?;
        self.compose(&descriptor, &["up", "-d", "--remove-orphans"])
            .await?;

        let mut output = self.describe(&descriptor, target, port);
        output["strategy"] = json!(strategy.as_str());
        output["volumes_kept"] = json!(strategy == UpgradeStrategy::InPlace);
        Ok(output)
    }

    pub async fn inspect(&self, instance: &LabInstance) -> Result<LiveStatus, DriverError> {
        let container = container_of(instance)?;
        let out = self
            .run(
                &[
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{json .State}}".to_string(),
                    container.to_string(),
                ],
                self.command_timeout,
            )
            .await?;
        let details = parse_json(&out.stdout)?;
        let status = details
            .get("Status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(LiveStatus { status, details })
    }

    pub async fn stats(&self, instance: &LabInstance) -> Result<RuntimeOutput, DriverError> {
        let container = container_of(instance)?;
        let out = self
            .run(
                &[
                    "stats".to_string(),
                    "--no-stream".to_string(),
                    "--format".to_string(),
                    "{{json .}}".to_string(),
                    container.to_string(),
                ],
                self.command_timeout,
            )
            .await?;
        parse_json(&out.stdout)
    }

    pub async fn logs(&self, instance: &LabInstance, tail: usize) -> Result<Vec<String>, DriverError> {
        let container = container_of(instance)?;
        let out = self
            .run(
                &[
                    "logs".to_string(),
                    "--tail".to_string(),
                    tail.to_string(),
                    container.to_string(),
                ],
                self.command_timeout,
            )
            .await?;
        // the runtime replays the container's stderr on its own stderr
        Ok(out
            .stdout
            .lines()
            .chain(out.stderr.lines())
            .map(str::to_string)
            .collect())
    }

    /// Liveness query against the runtime daemon; returns its version.
    pub async fn probe(&self, limit: Duration) -> Result<String, DriverError> {
        let out = self
            .run(
                &[
                    "info".to_string(),
                    "--format".to_string(),
                    "{{.ServerVersion}}".to_string(),
                ],
                limit,
            )
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn teardown(&self, descriptor: &RuntimeDescriptor) -> Result<CommandOutput, DriverError> {
        self.compose(descriptor, &["down", "-v", "--remove-orphans"])
            .await
    }

    async fn write_definition(
        &self,
        descriptor: &RuntimeDescriptor,
        rendered: &str,
    ) -> Result<(), DriverError> {
        tokio::fs::create_dir_all(&descriptor.directory).await?;
        tokio::fs::write(&descriptor.compose_file, rendered).await?;
        debug!("Wrote compose definition {}", descriptor.compose_file.display());
        Ok(())
    }

    fn describe(&self, descriptor: &RuntimeDescriptor, template: &LabTemplate, port: u16) -> Value {
        // only the generated definition pins a container name
        let container = if template.execution.compose_descriptor().is_some() {
            Value::Null
        } else {
            json!(descriptor.container_name)
        };
        json!({
            "driver": "local",
            "project": descriptor.project,
            "container": container,
            "network": descriptor.network,
            "compose_file": descriptor.compose_file.display().to_string(),
            "image": template.execution.image,
            "template_version": template.version,
            "host_port": port,
            "internal_port": template.execution.internal_port,
        })
    }

    async fn compose(
        &self,
        descriptor: &RuntimeDescriptor,
        action: &[&str],
    ) -> Result<CommandOutput, DriverError> {
        let mut args = vec![
            "compose".to_string(),
            "-p".to_string(),
            descriptor.project.clone(),
        ];
        if descriptor.compose_file.exists() {
            args.push("-f".to_string());
            args.push(descriptor.compose_file.display().to_string());
        }
        args.extend(action.iter().map(|a| a.to_string()));
        self.run(&args, self.command_timeout).await
    }

    async fn run(&self, args: &[String], limit: Duration) -> Result<CommandOutput, DriverError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!("Running `{}`", command);

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Failed to spawn `{}`: {}", command, e);
                return Err(DriverError::SpawnFailed {
                    command,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                error!("`{}` did not finish within {}s", command, limit.as_secs());
                return Err(DriverError::Timeout {
                    command,
                    secs: limit.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            error!(
                "`{}` failed with status {:?}: {}",
                command,
                output.status.code(),
                stderr.trim()
            );
            return Err(DriverError::CommandFailed {
                command,
                code: output.status.code(),
                stderr,
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }
}

fn container_of(instance: &LabInstance) -> Result<&str, DriverError> {
    instance
        .runtime_metadata
        .container_ref()
        .ok_or_else(|| DriverError::NoContainer(instance.id.clone()))
}

fn parse_json(raw: &str) -> Result<Value, DriverError> {
    serde_json::from_str(raw.trim())
        .map_err(|e| DriverError::RenderFailed(format!("unexpected runtime output: {}", e)))
}

/// Substitutes the host port into a template-supplied compose descriptor.
pub(crate) fn render_descriptor(compose: &str, port: u16) -> Result<String, DriverError> {
    if !compose.contains(HOST_PORT_PLACEHOLDER) {
        return Err(DriverError::RenderFailed(format!(
            "compose descriptor does not reference {}",
            HOST_PORT_PLACEHOLDER
        )));
    }

    let mut rendered = compose.to_string();
    for loopback in ["127.0.0.1", "localhost"] {
        let bound = format!("{}:{}", loopback, HOST_PORT_PLACEHOLDER);
        if rendered.contains(&bound) {
            warn!(
                "Compose descriptor publishes the lab port on {}; rebinding on all interfaces",
                loopback
            );
            rendered = rendered.replace(&bound, &format!("0.0.0.0:{}", HOST_PORT_PLACEHOLDER));
        }
    }
    Ok(rendered.replace(HOST_PORT_PLACEHOLDER, &port.to_string()))
}

/// Builds a one-service compose definition. JSON is valid YAML, so the
/// runtime reads it as is.
pub(crate) fn render_single_service(
    descriptor: &RuntimeDescriptor,
    execution: &ExecutionConfig,
    port: u16,
) -> Result<String, DriverError> {
    if execution.image.trim().is_empty() {
        return Err(DriverError::RenderFailed(
            "template has neither an image nor a compose descriptor".to_string(),
        ));
    }

    let mut service = json!({
        "image": execution.image,
        "container_name": descriptor.container_name,
        "ports": [format!("0.0.0.0:{}:{}", port, execution.internal_port)],
        "environment": execution.env,
        "networks": ["lab"],
        "restart": "unless-stopped",
    });
    if let Some(cpus) = execution.resources.cpus {
        service["cpus"] = json!(cpus);
    }
    if let Some(memory) = execution.resources.memory_mb {
        service["mem_limit"] = json!(format!("{}m", memory));
    }

    let definition = json!({
        "name": descriptor.project,
        "services": { "lab": service },
        "networks": { "lab": { "name": descriptor.network } },
    });
    serde_json::to_string_pretty(&definition).map_err(|e| DriverError::RenderFailed(e.to_string()))
}

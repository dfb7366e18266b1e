use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::configuration::{Config, DriverKind, PortRange, PublicAccessConfig};
use crate::container_management::ExecutionDriver;
use crate::error_handling::types::{DriverError, PreflightError};
use crate::preflight::types::{CheckResult, PreflightReport};
use crate::public_access::ExposureMode;

/// Validates the node before labs are started on it.
pub struct PreflightService {
    workdir: PathBuf,
    binary: String,
    probe_timeout: Duration,
    driver: Arc<ExecutionDriver>,
    public: PublicAccessConfig,
    ports: PortRange,
}

impl PreflightService {
    pub fn new(config: &Config, driver: Arc<ExecutionDriver>) -> Self {
        Self {
            workdir: config.runtime.workdir.clone(),
            binary: config.runtime.binary.clone(),
            probe_timeout: Duration::from_secs(config.runtime.probe_timeout_secs),
            driver,
            public: config.public.clone(),
            ports: config.ports.range(),
        }
    }

    pub async fn report(&self) -> PreflightReport {
        let report = PreflightReport::new(
            self.check_workdir().await,
            self.check_runtime().await,
            self.check_public_access(),
        );
        for (name, check) in report.checks() {
            if check.ok {
                info!("Preflight [{}] ok: {}", name, check.message);
            } else {
                warn!("Preflight [{}] failed: {}", name, check.message);
            }
        }
        report
    }

    /// The full report, or an error carrying it when any check failed.
    pub async fn assert_ready(&self) -> Result<PreflightReport, PreflightError> {
        let report = self.report().await;
        if report.ready {
            Ok(report)
        } else {
            Err(PreflightError::NotReady(Box::new(report)))
        }
    }

    /// Creates the workdir root, then a randomised probe directory and file
    /// inside it, and removes both again.
    pub async fn check_workdir(&self) -> CheckResult {
        let root = &self.workdir;
        if let Err(e) = tokio::fs::create_dir_all(root).await {
            return CheckResult::fail(
                format!("Cannot create runtime workdir {}: {}", root.display(), e),
                workdir_hints(root),
            );
        }

        let probe = root.join(format!(".preflight-{}", Uuid::new_v4()));
        match write_probe(&probe).await {
            Ok(()) => CheckResult::pass(format!("Runtime workdir {} is writable", root.display())),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&probe).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Leftover preflight probe {}: {}", probe.display(), cleanup);
                    }
                }
                CheckResult::fail(
                    format!("Runtime workdir {} is not writable: {}", root.display(), e),
                    workdir_hints(root),
                )
            }
        }
    }

    pub async fn check_runtime(&self) -> CheckResult {
        match self.driver.probe(self.probe_timeout).await {
            Ok(version) => CheckResult::pass(format!(
                "Execution backend {:?} responded (version {})",
                self.driver.kind(),
                version
            )),
            Err(DriverError::NotImplemented(e)) => CheckResult::fail(
                format!("Execution backend is not implemented: {}", e),
                vec![
                    "Set runtime.driver = \"local\" to run labs on this node".to_string(),
                ],
            ),
            Err(e) => {
                let mut hints = vec![
                    "Start the container daemon, e.g. `sudo systemctl start docker`".to_string(),
                    "When running inside a container, mount the host socket with `-v /var/run/docker.sock:/var/run/docker.sock`".to_string(),
                    "Add the service user to the docker group: `sudo usermod -aG docker <user>`, then log in again".to_string(),
                ];
                if matches!(e, DriverError::SpawnFailed { .. }) {
                    hints.insert(
                        0,
                        format!(
                            "Install the `{}` CLI or point runtime.binary at it",
                            self.binary
                        ),
                    );
                }
                if matches!(e, DriverError::Timeout { .. }) {
                    hints.push(format!(
                        "The daemon did not answer within {}s; check its health or raise runtime.probe_timeout_secs",
                        self.probe_timeout.as_secs()
                    ));
                }
                CheckResult::fail(format!("Container runtime is not reachable: {}", e), hints)
            }
        }
    }

    pub fn check_public_access(&self) -> CheckResult {
        let mut problems = Vec::new();
        let mut hints = Vec::new();

        let mode = ExposureMode::parse(&self.public.mode);
        match mode {
            None => {
                problems.push(format!("unknown public.mode '{}'", self.public.mode));
                hints.push("Set public.mode to \"direct\" or \"proxy\"".to_string());
            }
            Some(ExposureMode::Proxy) if self.public.base_url.trim().is_empty() => {
                problems.push("proxy mode requires public.base_url".to_string());
                hints.push(
                    "Set public.base_url to the external URL of the reverse proxy, e.g. https://labs.example.org"
                        .to_string(),
                );
            }
            _ => {}
        }

        let allowed = self.public.allowed_range();
        if !allowed.is_well_formed() {
            problems.push(format!(
                "allowed public port range {}-{} is invalid",
                allowed.start, allowed.end
            ));
            hints.push(
                "Set public.allowed_port_start to a non-zero value not above public.allowed_port_end"
                    .to_string(),
            );
        } else if !allowed.covers(&self.ports) {
            problems.push(format!(
                "allowed public port range {}-{} does not cover the allocator range {}-{}",
                allowed.start, allowed.end, self.ports.start, self.ports.end
            ));
            hints.push(
                "Widen public.allowed_port_start/end or narrow ports.start/end so every allocatable port is public"
                    .to_string(),
            );
        }

        match (problems.is_empty(), mode) {
            (true, Some(mode)) => {
                CheckResult::pass(format!("Public access configured in {} mode", mode))
            }
            _ => CheckResult::fail(
                format!("Public access configuration is inconsistent: {}", problems.join("; ")),
                hints,
            ),
        }
    }
}

async fn write_probe(probe: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir(probe).await?;
    let file = probe.join("probe");
    tokio::fs::write(&file, b"rangelab preflight").await?;
    tokio::fs::remove_file(&file).await?;
    tokio::fs::remove_dir(probe).await
}

fn workdir_hints(root: &Path) -> Vec<String> {
    let root = root.display();
    vec![
        format!("Create the directory: `sudo mkdir -p {}`", root),
        format!("Give it to the service user: `sudo chown -R $(id -u):$(id -g) {}`", root),
        format!("Make it writable: `sudo chmod u+rwx {}`", root),
        "Or point runtime.workdir at a writable location".to_string(),
    ]
}

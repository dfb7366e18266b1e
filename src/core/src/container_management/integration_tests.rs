#[cfg(test)]
mod integration_tests {
    use crate::configuration::{DriverKind, RuntimeConfig};
    use crate::container_management::{DriverOperation, ExecutionDriver, UpgradeStrategy};
    use crate::instance_management::LabInstance;
    use crate::test_support::sample_template;
    use std::time::Duration;
    use tempfile::TempDir;

    fn is_docker_available() -> bool {
        std::process::Command::new("docker")
            .args(["info", "--format", "{{.ServerVersion}}"])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn local_driver(workdir: &TempDir) -> ExecutionDriver {
        ExecutionDriver::from_config(&RuntimeConfig {
            driver: DriverKind::Local,
            workdir: workdir.path().to_path_buf(),
            command_timeout_secs: 120,
            ..Default::default()
        })
    }

    fn nginx_template(version: &str) -> crate::template_management::LabTemplate {
        let mut template = sample_template("nginx-101", version, 80);
        template.execution.image = "nginx:alpine".to_string();
        template
    }

    #[tokio::test]
    #[ignore = "requires a running docker daemon"]
    async fn test_probe_reports_server_version() {
        if !is_docker_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let version = local_driver(&dir)
            .probe(Duration::from_secs(5))
            .await
            .expect("docker probe");
        assert!(!version.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running docker daemon and network access"]
    async fn test_full_lifecycle_against_docker() {
        if !is_docker_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let driver = local_driver(&dir);
        let template = nginx_template("1.0.0");
        let mut instance = LabInstance::new("it-user", &template);

        let output = driver
            .start(&instance, &template, 28080)
            .await
            .expect("start nginx lab");
        instance.runtime_metadata.record(DriverOperation::Start, output);

        let status = driver.inspect(&instance).await.expect("inspect");
        assert_eq!(status.status, "running");
        assert!(driver.stats(&instance).await.is_ok());
        assert!(driver.logs(&instance, 10).await.is_ok());

        driver.restart(&instance).await.expect("restart");

        let next = nginx_template("1.1.0");
        let output = driver
            .upgrade(&instance, &next, UpgradeStrategy::Reset, 28080)
            .await
            .expect("upgrade");
        instance.runtime_metadata.record(DriverOperation::Upgrade, output);

        driver.stop(&instance).await.expect("stop");
        let status = driver.inspect(&instance).await.expect("inspect stopped");
        assert_eq!(status.status, "exited");

        driver.destroy(&instance).await.expect("destroy");
        assert!(driver.inspect(&instance).await.is_err());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::configuration::{DriverKind, RuntimeConfig};
    use crate::container_management::local_runtime::{render_descriptor, render_single_service};
    use crate::container_management::{
        DriverOperation, ExecutionDriver, FakeDriver, LocalRuntime, RuntimeDescriptor,
        UpgradeStrategy,
    };
    use crate::error_handling::types::DriverError;
    use crate::instance_management::LabInstance;
    use crate::template_management::types::ResourceLimits;
    use crate::test_support::sample_template;

    fn runtime(binary: &str, workdir: PathBuf) -> LocalRuntime {
        LocalRuntime::new(&RuntimeConfig {
            driver: DriverKind::Local,
            binary: binary.to_string(),
            workdir,
            probe_timeout_secs: 5,
            command_timeout_secs: 10,
        })
    }

    fn instance_with_metadata(container: Option<&str>) -> LabInstance {
        let template = sample_template("web-101", "1.0.0", 8080);
        let mut instance = LabInstance::new("alice", &template);
        if let Some(container) = container {
            instance
                .runtime_metadata
                .record(DriverOperation::Start, json!({ "container": container }));
        }
        instance
    }

    #[test]
    fn test_descriptor_placeholder_is_substituted() {
        let compose = "services:\n  web:\n    ports:\n      - \"{{HOST_PORT}}:80\"\n";
        let rendered = render_descriptor(compose, 20004).unwrap();
        assert!(rendered.contains("\"20004:80\""));
        assert!(!rendered.contains("{{HOST_PORT}}"));
    }

    #[test]
    fn test_loopback_bindings_are_rebound() {
        let compose = "ports:\n  - \"127.0.0.1:{{HOST_PORT}}:80\"\n  - \"localhost:{{HOST_PORT}}:81\"\n";
        let rendered = render_descriptor(compose, 20001).unwrap();
        assert!(rendered.contains("0.0.0.0:20001:80"));
        assert!(rendered.contains("0.0.0.0:20001:81"));
        assert!(!rendered.contains("127.0.0.1"));
        assert!(!rendered.contains("localhost"));
    }

    #[test]
    fn test_descriptor_without_placeholder_is_rejected() {
        let err = render_descriptor("services: {}", 20001).unwrap_err();
        assert!(matches!(err, DriverError::RenderFailed(_)));
    }

    #[test]
    fn test_single_service_definition() {
        let mut template = sample_template("web-101", "1.0.0", 8080);
        template.execution.resources = ResourceLimits {
            cpus: Some(0.5),
            memory_mb: Some(256),
        };
        let descriptor = RuntimeDescriptor::for_instance(&PathBuf::from("/srv/labs"), "abc");
        let rendered = render_single_service(&descriptor, &template.execution, 20002).unwrap();
        let definition: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(definition["name"], "lab-abc");
        let service = &definition["services"]["lab"];
        assert_eq!(service["image"], template.execution.image.as_str());
        assert_eq!(service["container_name"], "lab-abc-app");
        assert_eq!(service["ports"], json!(["0.0.0.0:20002:8080"]));
        assert_eq!(service["environment"]["LAB_LEVEL"], "1");
        assert_eq!(service["cpus"], json!(0.5));
        assert_eq!(service["mem_limit"], "256m");
        assert_eq!(definition["networks"]["lab"]["name"], "lab-abc-net");
    }

    #[test]
    fn test_single_service_needs_an_image() {
        let mut template = sample_template("web-101", "1.0.0", 8080);
        template.execution.image = " ".to_string();
        let descriptor = RuntimeDescriptor::for_instance(&PathBuf::from("/srv/labs"), "abc");
        assert!(matches!(
            render_single_service(&descriptor, &template.execution, 20002),
            Err(DriverError::RenderFailed(_))
        ));
    }

    #[test]
    fn test_template_descriptor_wins_over_image() {
        let local = runtime("docker", PathBuf::from("/srv/labs"));
        let mut template = sample_template("web-101", "1.0.0", 8080);
        template.execution.compose = Some("ports: [\"{{HOST_PORT}}:8080\"]".to_string());
        let descriptor = local.descriptor("abc");
        let rendered = local.render(&descriptor, &template, 20003).unwrap();
        assert_eq!(rendered, "ports: [\"20003:8080\"]");

        // a blank descriptor falls back to the image
        template.execution.compose = Some("   ".to_string());
        let rendered = local.render(&descriptor, &template, 20003).unwrap();
        assert!(rendered.contains("0.0.0.0:20003:8080"));
    }

    #[tokio::test]
    async fn test_local_start_writes_definition() {
        let dir = TempDir::new().unwrap();
        let local = runtime("echo", dir.path().to_path_buf());
        let template = sample_template("web-101", "1.0.0", 8080);
        let instance = instance_with_metadata(None);

        let output = local.start(&instance, &template, 20005).await.unwrap();
        let descriptor = local.descriptor(&instance.id);
        assert_eq!(output["project"], descriptor.project.as_str());
        assert_eq!(output["container"], descriptor.container_name.as_str());
        assert_eq!(output["host_port"], 20005);

        let written = std::fs::read_to_string(&descriptor.compose_file).unwrap();
        assert!(written.contains("0.0.0.0:20005:8080"));

        local.destroy(&instance).await.unwrap();
        assert!(!descriptor.directory.exists());
        // destroying twice is harmless
        local.destroy(&instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_upgrade_reports_strategy() {
        let dir = TempDir::new().unwrap();
        let local = runtime("echo", dir.path().to_path_buf());
        let target = sample_template("web-101", "2.0.0", 8080);
        let instance = instance_with_metadata(None);

        let output = local
            .upgrade(&instance, &target, UpgradeStrategy::InPlace, 20006)
            .await
            .unwrap();
        assert_eq!(output["strategy"], "IN_PLACE");
        assert_eq!(output["volumes_kept"], true);
        assert_eq!(output["template_version"], "2.0.0");
    }

    #[tokio::test]
    async fn test_failing_runtime_command() {
        let dir = TempDir::new().unwrap();
        let local = runtime("false", dir.path().to_path_buf());
        let template = sample_template("web-101", "1.0.0", 8080);
        let instance = instance_with_metadata(None);

        match local.start(&instance, &template, 20005).await {
            Err(DriverError::CommandFailed { command, code, .. }) => {
                assert!(command.contains("up -d"));
                assert_eq!(code, Some(1));
            }
            other => panic!("expected a failed command, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_runtime_binary() {
        let dir = TempDir::new().unwrap();
        let local = runtime("rangelab-no-such-runtime", dir.path().to_path_buf());
        assert!(matches!(
            local.probe(Duration::from_secs(2)).await,
            Err(DriverError::SpawnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_only_calls_need_a_container() {
        let dir = TempDir::new().unwrap();
        let local = runtime("echo", dir.path().to_path_buf());
        let instance = instance_with_metadata(None);
        assert!(matches!(
            local.inspect(&instance).await,
            Err(DriverError::NoContainer(_))
        ));

        let instance = instance_with_metadata(Some("lab-x-app"));
        let lines = local.logs(&instance, 5).await.unwrap();
        assert_eq!(lines, vec!["logs --tail 5 lab-x-app".to_string()]);
    }

    #[tokio::test]
    async fn test_fake_journal_and_failure_injection() {
        let fake = FakeDriver::new();
        let template = sample_template("web-101", "1.0.0", 8080);
        let instance = instance_with_metadata(None);

        let output = fake.start(&instance, &template, 20000).await.unwrap();
        assert_eq!(output["container"], format!("fake-{}", instance.id));
        assert_eq!(fake.inspect(&instance).await.unwrap().status, "running");

        fake.fail_on(DriverOperation::Stop);
        assert!(matches!(
            fake.stop(&instance).await,
            Err(DriverError::Simulated(_))
        ));
        assert_eq!(fake.inspect(&instance).await.unwrap().status, "running");

        fake.clear_failures();
        fake.stop(&instance).await.unwrap();
        assert_eq!(fake.inspect(&instance).await.unwrap().status, "exited");

        fake.destroy(&instance).await.unwrap();
        assert!(fake.inspect(&instance).await.is_err());

        assert_eq!(
            fake.journal(),
            vec![
                format!("start:{}", instance.id),
                format!("stop:{}", instance.id),
                format!("stop:{}", instance.id),
                format!("destroy:{}", instance.id),
            ]
        );
        let tail = fake.logs(&instance, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1], format!("destroy:{}", instance.id));
    }

    #[tokio::test]
    async fn test_driver_dispatch() {
        let fake = ExecutionDriver::from_config(&RuntimeConfig {
            driver: DriverKind::Fake,
            ..Default::default()
        });
        assert_eq!(fake.kind(), DriverKind::Fake);
        assert!(fake.as_fake().is_some());
        assert_eq!(fake.probe(Duration::from_secs(1)).await.unwrap(), "fake");

        let cluster = ExecutionDriver::from_config(&RuntimeConfig {
            driver: DriverKind::Cluster,
            ..Default::default()
        });
        assert!(cluster.as_fake().is_none());
        let template = sample_template("web-101", "1.0.0", 8080);
        let instance = instance_with_metadata(None);
        assert!(matches!(
            cluster.start(&instance, &template, 20000).await,
            Err(DriverError::NotImplemented(_))
        ));
        assert!(matches!(
            cluster.probe(Duration::from_secs(1)).await,
            Err(DriverError::NotImplemented(_))
        ));
    }
}

use env_logger::Env;
use log::info;
use rangelab::actor::Actor;
use rangelab::configuration::{Config, DriverKind};
use rangelab::container_management::UpgradeStrategy;
use rangelab::controller::Controller;
use rangelab::storage::DatabaseStorage;
use rangelab::template_management::{ExecutionConfig, NewTemplate};
use std::env;

// Walks one lab through its whole life on the fake driver:
// draft, publish, activate, new release, upgrade, inspect, destroy.
#[tokio::main]
async fn main() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    let workdir = env::temp_dir().join("rangelab-demo");
    let mut config = Config::default();
    config.runtime.driver = DriverKind::Fake;
    config.runtime.workdir = workdir.clone();
    config.ports.probe_host = false;
    config.public.host = Some("labs.example.org".to_string());
    config.web.enabled = false;

    let storage = DatabaseStorage::in_memory().await.expect("in-memory database");
    let controller = Controller::with_storage(config, storage).expect("wire controller");

    let admin = Actor::admin("ops");
    let learner = Actor::user("alice").with_request_host(Some("portal.example.org".to_string()));

    let report = controller.preflight_report().await;
    info!("Preflight ready: {}", report.ready);

    let draft = controller
        .templates
        .create_draft(
            NewTemplate {
                slug: "sqli-basics".to_string(),
                title: "SQL injection basics".to_string(),
                difficulty: "easy".to_string(),
                category: "web".to_string(),
                version: "1.0.0".to_string(),
                execution: ExecutionConfig {
                    image: "registry.example.org/labs/sqli:1.0.0".to_string(),
                    internal_port: 8080,
                    ..Default::default()
                },
                ..Default::default()
            },
            &admin,
        )
        .await
        .expect("create draft");
    let v1 = controller
        .templates
        .publish(&draft.id, "1.0.0", "first release", &admin)
        .await
        .expect("publish 1.0.0");

    let instance = controller
        .instances
        .activate(&v1.id, &learner)
        .await
        .expect("activate");
    info!(
        "Instance {} reachable at {}",
        instance.id,
        instance.connection_url.as_deref().unwrap_or("-")
    );

    controller
        .instances
        .record_progress(&instance.id, 60)
        .await
        .expect("record progress");

    let v2 = controller
        .templates
        .publish(&v1.id, "1.1.0", "harder second stage", &admin)
        .await
        .expect("publish 1.1.0");
    let upgraded = controller
        .instances
        .upgrade(&instance.id, None, UpgradeStrategy::InPlace, &learner)
        .await
        .expect("upgrade in place");
    info!(
        "Upgraded to {} (v{}), progress kept at {}%",
        v2.id,
        upgraded.template_version_pinned.as_deref().unwrap_or("?"),
        upgraded.progress_percent
    );

    let inspection = controller
        .inspector
        .inspect(&instance.id, &admin)
        .await
        .expect("inspect");
    println!(
        "{}",
        serde_json::to_string_pretty(&inspection).expect("render inspection")
    );

    controller
        .instances
        .destroy(&instance.id, &learner)
        .await
        .expect("destroy");
    info!("Instance destroyed; port ledger keeps the history");

    let _ = std::fs::remove_dir_all(&workdir);
}

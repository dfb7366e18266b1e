use chrono::Utc;
use log::{error, info};
use std::sync::Arc;

use crate::admin_inspector::AdminInspector;
use crate::configuration::Config;
use crate::container_management::ExecutionDriver;
use crate::error_handling::types::ControllerError;
use crate::instance_management::{InstanceService, SweepReport};
use crate::orchestration::Orchestrator;
use crate::port_allocation::PortAllocator;
use crate::preflight::{PreflightReport, PreflightService};
use crate::public_access::PublicAccessResolver;
use crate::storage::DatabaseStorage;
use crate::template_management::TemplateService;
use crate::web_interface::WebServer;

/// Every component of the engine, built once from a [`Config`].
pub struct Controller {
    pub config: Config,
    pub storage: DatabaseStorage,
    pub driver: Arc<ExecutionDriver>,
    pub ports: Arc<PortAllocator>,
    pub orchestrator: Arc<Orchestrator>,
    pub preflight: Arc<PreflightService>,
    pub templates: TemplateService,
    pub instances: InstanceService,
    pub inspector: AdminInspector,
}

impl Controller {
    /// Connects to the configured database and wires the components.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        let storage = DatabaseStorage::connect(&config.database).await?;
        Self::with_storage(config, storage)
    }

    pub fn with_storage(config: Config, storage: DatabaseStorage) -> Result<Self, ControllerError> {
        info!("Wiring orchestration engine");
        let db = storage.connection().clone();

        let driver = Arc::new(ExecutionDriver::from_config(&config.runtime));
        let ports = Arc::new(
            PortAllocator::new(db.clone(), &config.ports)
                .map_err(|e| ControllerError::InitializationFailed(e.to_string()))?,
        );
        let resolver = PublicAccessResolver::new(config.public.clone());
        let orchestrator = Arc::new(Orchestrator::new(db.clone(), driver.clone(), resolver));
        let preflight = Arc::new(PreflightService::new(&config, driver.clone()));
        let templates = TemplateService::new(db.clone());
        let instances = InstanceService::new(
            db,
            templates.clone(),
            ports.clone(),
            orchestrator.clone(),
            preflight.clone(),
            config.instances.clone(),
        );
        let inspector = AdminInspector::new(
            instances.clone(),
            templates.clone(),
            driver.clone(),
            config.instances.inspect_log_lines,
        );

        Ok(Self {
            config,
            storage,
            driver,
            ports,
            orchestrator,
            preflight,
            templates,
            instances,
            inspector,
        })
    }

    /// Serves the HTTP interface until the process is stopped.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let report = self.preflight.report().await;
        if !report.ready {
            error!("Preflight failed; activations will be refused until it passes");
        }

        if !self.config.web.enabled {
            info!("Web interface disabled; nothing to serve");
            return Ok(());
        }
        WebServer::new(self.config.web.clone())
            .run(self.instances.clone(), self.templates.clone(), self.inspector.clone(), self.preflight.clone())
            .await
    }

    pub async fn preflight_report(&self) -> PreflightReport {
        self.preflight.report().await
    }

    /// One expiry sweep as of now.
    pub async fn sweep(&self) -> Result<SweepReport, ControllerError> {
        Ok(self.instances.sweep_expired(Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::configuration::DriverKind;
    use crate::test_support::{fixture, publish_new};
    use chrono::Duration;

    #[tokio::test]
    async fn test_components_share_one_driver() {
        let fx = fixture().await;
        assert_eq!(fx.controller.driver.kind(), DriverKind::Fake);
        assert!(fx.controller.preflight_report().await.ready);
    }

    #[tokio::test]
    async fn test_inverted_port_range_fails_wiring() {
        let mut config = Config::default();
        config.ports.start = 30000;
        config.ports.end = 20000;
        let storage = DatabaseStorage::in_memory().await.unwrap();
        assert!(matches!(
            Controller::with_storage(config, storage),
            Err(ControllerError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_runs_against_current_time() {
        let fx = fixture().await;
        let template = publish_new(&fx, "web-101", "1.0.0", 8080).await;
        let alice = Actor::user("alice");
        fx.controller.instances.activate(&template.id, &alice).await.unwrap();

        let report = fx.controller.sweep().await.unwrap();
        assert_eq!(report.expired, 0);

        let later = Utc::now() + Duration::days(1);
        let report = fx.controller.instances.sweep_expired(later).await.unwrap();
        assert_eq!(report.deactivated, 1);
    }
}

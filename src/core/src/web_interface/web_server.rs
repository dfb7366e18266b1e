use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use warp::{Filter, Reply};

use super::routes::*;
use crate::admin_inspector::AdminInspector;
use crate::configuration::WebConfig;
use crate::error_handling::types::ControllerError;
use crate::instance_management::InstanceService;
use crate::preflight::PreflightService;
use crate::template_management::TemplateService;

/// HTTP surface over the orchestration services.
pub struct WebServer {
    config: WebConfig,
}

impl WebServer {
    pub fn new(config: WebConfig) -> Self {
        Self { config }
    }

    pub fn address(&self) -> Result<SocketAddr, ControllerError> {
        format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| {
                ControllerError::WebError(format!(
                    "invalid bind address {}:{}: {}",
                    self.config.bind_address, self.config.port, e
                ))
            })
    }

    /// Every route, with rejections rendered as JSON errors.
    pub fn routes(
        instances: InstanceService,
        templates: TemplateService,
        inspector: AdminInspector,
        preflight: Arc<PreflightService>,
    ) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        catalog_route(templates.clone())
            .or(activate_route(instances.clone()))
            .or(list_instances_route(instances.clone()))
            .or(upgrade_route(instances.clone()))
            .or(instance_action_route(instances.clone()))
            .or(create_template_route(templates.clone()))
            .or(update_template_route(templates.clone()))
            .or(publish_template_route(templates.clone()))
            .or(archive_template_route(templates))
            .or(inspect_instances_route(inspector))
            .or(admin_action_route(instances))
            .or(preflight_route(preflight))
            .recover(handle_rejection)
    }

    /// Serves until the process is stopped.
    pub async fn run(
        &self,
        instances: InstanceService,
        templates: TemplateService,
        inspector: AdminInspector,
        preflight: Arc<PreflightService>,
    ) -> Result<(), ControllerError> {
        let addr = self.address()?;
        let routes = Self::routes(instances, templates, inspector, preflight)
            .with(warp::log("rangelab::http"));

        info!("Web interface listening on http://{}", addr);
        warp::serve(routes).run(addr).await;
        Ok(())
    }
}

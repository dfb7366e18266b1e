use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::actor::Actor;
use crate::container_management::ExecutionDriver;
use crate::error_handling::types::{DriverError, InstanceError};
use crate::instance_management::instance_service::require_admin;
use crate::instance_management::{InstanceService, InstanceState, LabInstance};
use crate::template_management::TemplateService;

pub const REDACTED: &str = "********";

/// What an operator dashboard shows for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInspection {
    pub instance_id: String,
    pub user_id: String,
    pub template_id: String,
    pub template_version: Option<String>,
    pub db_state: InstanceState,
    /// Status reported by the runtime, or `unknown` / `not implemented`.
    pub live_status: String,
    /// Live status when the runtime answered, otherwise the stored state.
    pub effective_status: String,
    pub resource_usage: Value,
    pub logs: Value,
    pub environment: BTreeMap<String, String>,
    pub assigned_port: Option<u16>,
    pub connection_url: Option<String>,
    pub last_error: Option<String>,
}

/// Read-only view over instances and their runtime side.
#[derive(Clone)]
pub struct AdminInspector {
    instances: InstanceService,
    templates: TemplateService,
    driver: Arc<ExecutionDriver>,
    log_lines: usize,
}

impl AdminInspector {
    pub fn new(
        instances: InstanceService,
        templates: TemplateService,
        driver: Arc<ExecutionDriver>,
        log_lines: usize,
    ) -> Self {
        Self {
            instances,
            templates,
            driver,
            log_lines,
        }
    }

    pub async fn inspect(
        &self,
        instance_id: &str,
        admin: &Actor,
    ) -> Result<InstanceInspection, InstanceError> {
        require_admin(admin)?;
        let instance = self.instances.load(instance_id).await?;
        self.describe(instance).await
    }

    pub async fn list(&self, admin: &Actor) -> Result<Vec<InstanceInspection>, InstanceError> {
        require_admin(admin)?;
        let mut inspections = Vec::new();
        for instance in self.instances.list_all().await? {
            inspections.push(self.describe(instance).await?);
        }
        Ok(inspections)
    }

    async fn describe(&self, instance: LabInstance) -> Result<InstanceInspection, InstanceError> {
        let template = self.templates.get(&instance.template_id).await?;

        let (live_status, live) = match self.driver.inspect(&instance).await {
            Ok(status) => (status.status, true),
            Err(e) => (unavailable(&instance, &e).to_string(), false),
        };
        let effective_status = if live {
            live_status.clone()
        } else {
            instance.state.as_str().to_ascii_lowercase()
        };

        let resource_usage = match self.driver.stats(&instance).await {
            Ok(stats) => stats,
            Err(e) => json!(unavailable(&instance, &e)),
        };
        let logs = match self.driver.logs(&instance, self.log_lines).await {
            Ok(lines) => json!(lines),
            Err(e) => json!(unavailable(&instance, &e)),
        };

        Ok(InstanceInspection {
            instance_id: instance.id,
            user_id: instance.user_id,
            template_id: instance.template_id,
            template_version: instance.template_version_pinned,
            db_state: instance.state,
            live_status,
            effective_status,
            resource_usage,
            logs,
            environment: redact_environment(&template.execution.env),
            assigned_port: instance.assigned_port,
            connection_url: instance.connection_url,
            last_error: instance.last_error,
        })
    }
}

fn unavailable(instance: &LabInstance, err: &DriverError) -> &'static str {
    debug!("Runtime data unavailable for instance {}: {}", instance.id, err);
    match err {
        DriverError::NotImplemented(_) => "not implemented",
        _ => "unknown",
    }
}

fn secret_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(password|secret|token|key|flag)").expect("secret key pattern compiles")
    })
}

/// Copy of `env` with secret-looking values masked.
pub fn redact_environment(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            if secret_key_pattern().is_match(key) {
                (key.clone(), REDACTED.to_string())
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::DriverKind;
    use crate::test_support::{fixture, fixture_with, publish_new};

    #[test]
    fn test_redaction_is_case_insensitive() {
        let env: BTreeMap<String, String> = [
            ("DB_PASSWORD", "hunter2"),
            ("api_token", "abc"),
            ("Flag", "FLAG{x}"),
            ("SSH_KEY_PATH", "/root/.ssh/id"),
            ("client_Secret", "s"),
            ("LAB_MODE", "easy"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let redacted = redact_environment(&env);
        assert_eq!(redacted["DB_PASSWORD"], REDACTED);
        assert_eq!(redacted["api_token"], REDACTED);
        assert_eq!(redacted["Flag"], REDACTED);
        assert_eq!(redacted["SSH_KEY_PATH"], REDACTED);
        assert_eq!(redacted["client_Secret"], REDACTED);
        assert_eq!(redacted["LAB_MODE"], "easy");
    }

    #[tokio::test]
    async fn test_live_status_wins_over_stored_state() {
        let fx = fixture().await;
        let template = publish_new(&fx, "web-101", "1.0.0", 8080).await;
        let instance = fx
            .controller
            .instances
            .activate(&template.id, &Actor::user("alice"))
            .await
            .unwrap();

        let admin = Actor::admin("root");
        let inspection = fx.controller.inspector.inspect(&instance.id, &admin).await.unwrap();
        assert_eq!(inspection.db_state, InstanceState::Active);
        assert_eq!(inspection.live_status, "running");
        assert_eq!(inspection.effective_status, "running");
        assert_eq!(inspection.environment["FLAG"], REDACTED);
        assert_eq!(inspection.environment["LAB_LEVEL"], "1");
        assert!(inspection.logs.as_array().is_some());
    }

    #[tokio::test]
    async fn test_unknown_container_falls_back_to_stored_state() {
        let fx = fixture().await;
        let template = publish_new(&fx, "web-101", "1.0.0", 8080).await;
        let instance = fx
            .controller
            .instances
            .activate(&template.id, &Actor::user("alice"))
            .await
            .unwrap();
        fx.controller
            .instances
            .destroy(&instance.id, &Actor::user("alice"))
            .await
            .unwrap();

        let list = fx.controller.inspector.list(&Actor::admin("root")).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].live_status, "unknown");
        assert_eq!(list[0].effective_status, "inactive");
    }

    #[tokio::test]
    async fn test_cluster_backend_reports_not_implemented() {
        let fx = fixture_with(|config| {
            config.runtime.driver = DriverKind::Cluster;
            config.instances.require_preflight = false;
        })
        .await;
        let template = publish_new(&fx, "web-101", "1.0.0", 8080).await;
        // activation fails on the cluster stub but leaves the row behind
        assert!(fx
            .controller
            .instances
            .activate(&template.id, &Actor::user("alice"))
            .await
            .is_err());

        let list = fx.controller.inspector.list(&Actor::admin("root")).await.unwrap();
        assert_eq!(list[0].live_status, "not implemented");
        assert_eq!(list[0].resource_usage, json!("not implemented"));
        assert_eq!(list[0].effective_status, "inactive");
        assert!(list[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_inspection_requires_admin() {
        let fx = fixture().await;
        let err = fx
            .controller
            .inspector
            .list(&Actor::user("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, InstanceError::AdminRequired));
    }
}

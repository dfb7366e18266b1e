//! Shared fixtures for unit tests: an in-memory database, the fake driver and
//! a public host that makes connection URLs predictable.

use chrono::Utc;
use std::collections::BTreeMap;

use tempfile::TempDir;

use crate::actor::Actor;
use crate::configuration::{Config, DriverKind};
use crate::container_management::FakeDriver;
use crate::controller::Controller;
use crate::storage::DatabaseStorage;
use crate::template_management::types::{ExecutionConfig, LabTemplate, NewTemplate};
use crate::template_management::TemplateStatus;
use crate::template_management::TemplateService;

pub const PUBLIC_HOST: &str = "labs.example.test";

pub async fn template_service() -> TemplateService {
    let storage = DatabaseStorage::in_memory().await.unwrap();
    TemplateService::new(storage.connection().clone())
}

pub fn new_template(slug: &str, version: &str, internal_port: u16) -> NewTemplate {
    let env: BTreeMap<String, String> = [("FLAG", "FLAG{demo}"), ("LAB_LEVEL", "1")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    NewTemplate {
        family: None,
        slug: slug.to_string(),
        title: format!("Lab {}", slug),
        difficulty: "easy".to_string(),
        category: "web".to_string(),
        version: version.to_string(),
        execution: ExecutionConfig {
            image: format!("registry.example.test/{}:{}", slug, version),
            internal_port,
            env,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Published template that only lives in memory, for driver-level tests.
pub fn sample_template(slug: &str, version: &str, internal_port: u16) -> LabTemplate {
    let input = new_template(slug, version, internal_port);
    let now = Utc::now();
    LabTemplate {
        id: uuid::Uuid::new_v4().to_string(),
        family: uuid::Uuid::new_v4().to_string(),
        slug: input.slug,
        title: input.title,
        difficulty: input.difficulty,
        category: input.category,
        guide: input.guide,
        objectives: input.objectives,
        prerequisites: input.prerequisites,
        tags: input.tags,
        version: input.version,
        status: TemplateStatus::Published,
        is_latest: true,
        published_at: Some(now),
        changelog: Vec::new(),
        execution: input.execution,
        created_at: now,
        updated_at: now,
    }
}

/// Fake driver, ten ports starting at 20000 and no host probing.
pub fn test_config(workdir: &TempDir) -> Config {
    let mut config = Config::default();
    config.runtime.driver = DriverKind::Fake;
    config.runtime.workdir = workdir.path().join("instances");
    config.ports.start = 20000;
    config.ports.end = 20009;
    config.ports.probe_host = false;
    config.public.host = Some(PUBLIC_HOST.to_string());
    config.public.allowed_port_start = 20000;
    config.public.allowed_port_end = 20009;
    config.instances.require_preflight = true;
    config.instances.ttl_minutes = 60;
    config.web.enabled = false;
    config
}

pub struct Fixture {
    pub controller: Controller,
    _workdir: TempDir,
}

impl Fixture {
    pub fn fake(&self) -> &FakeDriver {
        self.controller
            .driver
            .as_fake()
            .expect("fixture runs on the fake driver")
    }

    pub fn admin(&self) -> Actor {
        Actor::admin("ops")
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

pub async fn fixture_with(adjust: impl FnOnce(&mut Config)) -> Fixture {
    let workdir = TempDir::new().unwrap();
    let mut config = test_config(&workdir);
    adjust(&mut config);
    let storage = DatabaseStorage::in_memory().await.unwrap();
    let controller = Controller::with_storage(config, storage).unwrap();
    Fixture {
        controller,
        _workdir: workdir,
    }
}

/// Drafts and publishes a template in a fresh family.
pub async fn publish_new(fx: &Fixture, slug: &str, version: &str, internal_port: u16) -> LabTemplate {
    let templates = &fx.controller.templates;
    let draft = templates
        .create_draft(new_template(slug, version, internal_port), &fx.admin())
        .await
        .unwrap();
    templates
        .publish(&draft.id, version, "initial release", &fx.admin())
        .await
        .unwrap()
}

/// Publishes `version` as the next release of `base`'s family.
pub async fn publish_next(
    fx: &Fixture,
    base: &LabTemplate,
    version: &str,
    internal_port: u16,
) -> LabTemplate {
    let templates = &fx.controller.templates;
    let mut input = new_template(&base.slug, version, internal_port);
    input.family = Some(base.family.clone());
    let draft = templates.create_draft(input, &fx.admin()).await.unwrap();
    templates
        .publish(&draft.id, version, &format!("release {}", version), &fx.admin())
        .await
        .unwrap()
}

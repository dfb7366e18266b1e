use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, error, info, warn};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;

use crate::actor::Actor;
use crate::configuration::InstanceConfig;
use crate::container_management::types::UpgradeStrategy;
use crate::error_handling::types::InstanceError;
use crate::instance_management::types::{InstanceState, LabInstance, SweepReport};
use crate::orchestration::orchestrator::persist;
use crate::orchestration::Orchestrator;
use crate::port_allocation::PortAllocator;
use crate::preflight::PreflightService;
use crate::storage::db_entities::lab_instances::{self, Column, Entity};
use crate::storage::types::format_timestamp;
use crate::template_management::{LabTemplate, TemplateService, TemplateStatus};

/// Owner of the instance lifecycle.
///
/// Every user-facing call checks that the instance belongs to the caller;
/// administrators go through the `force_*` operations instead, which are
/// written to the `audit` log target.
#[derive(Clone)]
pub struct InstanceService {
    db: DatabaseConnection,
    templates: TemplateService,
    ports: Arc<PortAllocator>,
    orchestrator: Arc<Orchestrator>,
    preflight: Arc<PreflightService>,
    settings: InstanceConfig,
}

impl InstanceService {
    pub fn new(
        db: DatabaseConnection,
        templates: TemplateService,
        ports: Arc<PortAllocator>,
        orchestrator: Arc<Orchestrator>,
        preflight: Arc<PreflightService>,
        settings: InstanceConfig,
    ) -> Self {
        Self {
            db,
            templates,
            ports,
            orchestrator,
            preflight,
            settings,
        }
    }

    /// Starts the caller's instance of the family `template_id` belongs to,
    /// creating it on first use.
    ///
    /// A new instance needs a PUBLISHED template. An existing one is started
    /// against the template it is currently bound to, which may be another
    /// version of the same family.
    pub async fn activate(
        &self,
        template_id: &str,
        actor: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        let requested = self.templates.get(template_id).await?;
        if self.settings.require_preflight {
            self.preflight.assert_ready().await?;
        }
        let now = Utc::now();
        let expires_at = self.expiry_from(now)?;

        let mut instance = self.find_or_create(&actor.user_id, &requested).await?;
        let template = if instance.template_id == requested.id {
            requested
        } else {
            debug!(
                "Instance {} is bound to template {}, not {}",
                instance.id, instance.template_id, requested.id
            );
            self.templates.get(&instance.template_id).await?
        };

        let port = self.ports.allocate(&instance.id).await?;
        if let Err(e) = self
            .orchestrator
            .start_instance(&mut instance, &template, port, actor.request_host.as_deref())
            .await
        {
            error!("Activation of instance {} failed: {}", instance.id, e);
            self.record_failure(&mut instance, &e, true).await;
            return Err(e);
        }

        instance.state = InstanceState::Active;
        instance.attempts += 1;
        instance.last_activity_at = Some(now);
        instance.started_at.get_or_insert(now);
        instance.expires_at = expires_at;
        instance.template_version_pinned = Some(template.version.clone());
        instance.last_error = None;
        persist(&self.db, &mut instance).await?;

        info!(
            "Instance {} of user {} active on port {} ({} v{})",
            instance.id, instance.user_id, port, template.slug, template.version
        );
        Ok(instance)
    }

    pub async fn deactivate(
        &self,
        instance_id: &str,
        actor: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        let mut instance = self.owned(instance_id, actor).await?;
        self.stop(&mut instance).await?;
        info!("Instance {} deactivated by {}", instance.id, actor.user_id);
        Ok(instance)
    }

    /// Restarts the runtime side; the lifecycle state is left alone.
    pub async fn restart(
        &self,
        instance_id: &str,
        actor: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        let mut instance = self.owned(instance_id, actor).await?;
        self.bounce(&mut instance).await?;
        info!("Instance {} restarted by {}", instance.id, actor.user_id);
        Ok(instance)
    }

    /// Moves the instance onto another published template.
    ///
    /// Without `target_template_id` the family's latest published version is
    /// used. IN_PLACE keeps progress and volumes and only accepts a target of
    /// the same family with the same internal port; RESET wipes both.
    pub async fn upgrade(
        &self,
        instance_id: &str,
        target_template_id: Option<&str>,
        strategy: UpgradeStrategy,
        actor: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        let mut instance = self.owned(instance_id, actor).await?;
        let current = self.templates.get(&instance.template_id).await?;

        let target = match target_template_id {
            Some(id) => {
                let target = self.templates.get(id).await?;
                if target.status != TemplateStatus::Published {
                    return Err(InstanceError::TemplateNotActivatable {
                        template_id: target.id,
                        status: target.status.to_string(),
                    });
                }
                target
            }
            None => self
                .templates
                .find_latest_for_family(&instance.template_family)
                .await?
                .ok_or_else(|| InstanceError::NoPublishedTarget(instance.template_family.clone()))?,
        };

        match strategy {
            UpgradeStrategy::InPlace => check_in_place(&current, &target)?,
            UpgradeStrategy::Reset => {
                if target.family != instance.template_family
                    && self
                        .find_for(&instance.user_id, &target.family)
                        .await?
                        .is_some()
                {
                    return Err(InstanceError::FamilyConflict {
                        family: target.family,
                    });
                }
            }
        }

        let now = Utc::now();
        let expires_at = self.expiry_from(now)?;
        let snapshot = instance.clone();
        if strategy == UpgradeStrategy::Reset {
            instance.progress_percent = 0;
            instance.notes.clear();
            instance.completed_at = None;
        }

        let (port, fresh_port) = match instance.assigned_port {
            Some(port) => (port, false),
            None => (self.ports.allocate(&instance.id).await?, true),
        };

        if let Err(e) = self
            .orchestrator
            .upgrade_instance(
                &mut instance,
                &target,
                strategy,
                port,
                actor.request_host.as_deref(),
            )
            .await
        {
            error!("Upgrade of instance {} failed: {}", instance.id, e);
            let mut restored = snapshot;
            self.record_failure(&mut restored, &e, fresh_port).await;
            return Err(e);
        }

        instance.template_id = target.id.clone();
        instance.template_family = target.family.clone();
        instance.template_version_pinned = Some(target.version.clone());
        instance.state = InstanceState::Active;
        instance.last_activity_at = Some(now);
        instance.started_at.get_or_insert(now);
        instance.expires_at = expires_at;
        instance.last_error = None;
        persist(&self.db, &mut instance).await?;

        info!(
            "Instance {} upgraded {} -> {} ({}) by {}",
            instance.id,
            current.version,
            target.version,
            strategy.as_str(),
            actor.user_id
        );
        Ok(instance)
    }

    /// Tears the runtime side down for good; the row itself stays.
    pub async fn destroy(
        &self,
        instance_id: &str,
        actor: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        let mut instance = self.owned(instance_id, actor).await?;
        self.orchestrator.destroy_instance(&mut instance).await?;
        info!("Instance {} destroyed by {}", instance.id, actor.user_id);
        Ok(instance)
    }

    pub async fn force_stop(
        &self,
        instance_id: &str,
        admin: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        require_admin(admin)?;
        let mut instance = self.load(instance_id).await?;
        info!(
            target: "audit",
            "admin {} force-stopping instance {} of user {}",
            admin.user_id, instance.id, instance.user_id
        );
        match self.stop(&mut instance).await {
            Ok(()) => {
                info!(target: "audit", "instance {} force-stopped", instance.id);
                Ok(instance)
            }
            Err(e) => {
                warn!(target: "audit", "force-stop of instance {} failed: {}", instance.id, e);
                Err(e)
            }
        }
    }

    pub async fn force_restart(
        &self,
        instance_id: &str,
        admin: &Actor,
    ) -> Result<LabInstance, InstanceError> {
        require_admin(admin)?;
        let mut instance = self.load(instance_id).await?;
        info!(
            target: "audit",
            "admin {} force-restarting instance {} of user {}",
            admin.user_id, instance.id, instance.user_id
        );
        match self.bounce(&mut instance).await {
            Ok(()) => {
                info!(target: "audit", "instance {} force-restarted", instance.id);
                Ok(instance)
            }
            Err(e) => {
                warn!(target: "audit", "force-restart of instance {} failed: {}", instance.id, e);
                Err(e)
            }
        }
    }

    /// Progress pushed by the challenge subsystem. Values are clamped to
    /// 0..=100; reaching 100 completes the instance.
    pub async fn record_progress(
        &self,
        instance_id: &str,
        percent: i32,
    ) -> Result<LabInstance, InstanceError> {
        let mut instance = self.load(instance_id).await?;
        let now = Utc::now();
        instance.progress_percent = percent.clamp(0, 100) as u8;
        instance.last_activity_at = Some(now);
        if instance.progress_percent == 100 && instance.state != InstanceState::Completed {
            instance.state = InstanceState::Completed;
            instance.completed_at = Some(now);
            info!("Instance {} completed", instance.id);
        }
        persist(&self.db, &mut instance).await?;
        Ok(instance)
    }

    /// Deactivates every ACTIVE instance whose expiry is at or before `now`,
    /// through the same path an owner would use.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, InstanceError> {
        let expired = Entity::find()
            .filter(Column::State.eq(InstanceState::Active.as_str()))
            .filter(Column::ExpiresAt.is_not_null())
            .filter(Column::ExpiresAt.lte(format_timestamp(now)))
            .order_by_asc(Column::ExpiresAt)
            .all(&self.db)
            .await?;

        let mut report = SweepReport {
            expired: expired.len(),
            ..Default::default()
        };
        for row in expired {
            let owner = Actor::user(row.user_id.as_str());
            match self.deactivate(&row.id, &owner).await {
                Ok(_) => report.deactivated += 1,
                Err(e) => {
                    error!("Sweep could not deactivate instance {}: {}", row.id, e);
                    report.failed += 1;
                }
            }
        }
        if report.expired > 0 {
            info!(
                "Expiry sweep: {} expired, {} deactivated, {} failed",
                report.expired, report.deactivated, report.failed
            );
        }
        Ok(report)
    }

    pub async fn get(&self, instance_id: &str, actor: &Actor) -> Result<LabInstance, InstanceError> {
        self.owned(instance_id, actor).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<LabInstance>, InstanceError> {
        let rows = Entity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;
        to_instances(rows)
    }

    pub async fn list_all(&self) -> Result<Vec<LabInstance>, InstanceError> {
        let rows = Entity::find()
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;
        to_instances(rows)
    }

    async fn stop(&self, instance: &mut LabInstance) -> Result<(), InstanceError> {
        self.orchestrator.stop_instance(instance).await
    }

    async fn bounce(&self, instance: &mut LabInstance) -> Result<(), InstanceError> {
        self.orchestrator.restart_instance(instance).await?;
        instance.last_activity_at = Some(Utc::now());
        persist(&self.db, instance).await
    }

    /// Keeps the error on the row and gives back a port taken for the
    /// failed call. Secondary failures are logged; the caller returns the
    /// original error.
    async fn record_failure(&self, instance: &mut LabInstance, cause: &InstanceError, release_port: bool) {
        if release_port {
            if let Err(e) = self.ports.release(&instance.id).await {
                error!("Could not release port of instance {}: {}", instance.id, e);
            }
            instance.assigned_port = None;
            instance.connection_url = None;
        }
        instance.last_error = Some(cause.to_string());
        if let Err(e) = persist(&self.db, instance).await {
            error!("Could not record failure on instance {}: {}", instance.id, e);
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, InstanceError> {
        match self.settings.ttl_minutes {
            0 => Ok(None),
            minutes => i64::try_from(minutes)
                .ok()
                .and_then(TimeDelta::try_minutes)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .map(Some)
                .ok_or(InstanceError::ExpiryOutOfRange(minutes)),
        }
    }

    /// Unchecked read for administrative and internal callers.
    pub(crate) async fn load(&self, instance_id: &str) -> Result<LabInstance, InstanceError> {
        let row = Entity::find_by_id(instance_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| InstanceError::NotFound(instance_id.to_string()))?;
        Ok(LabInstance::try_from(row)?)
    }

    async fn owned(&self, instance_id: &str, actor: &Actor) -> Result<LabInstance, InstanceError> {
        let instance = self.load(instance_id).await?;
        if instance.user_id != actor.user_id {
            warn!(
                "User {} attempted to access instance {} owned by {}",
                actor.user_id, instance.id, instance.user_id
            );
            return Err(InstanceError::Forbidden {
                instance_id: instance.id,
                user_id: actor.user_id.clone(),
            });
        }
        Ok(instance)
    }

    async fn find_for(&self, user_id: &str, family: &str) -> Result<Option<LabInstance>, InstanceError> {
        let row = Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::TemplateFamily.eq(family))
            .one(&self.db)
            .await?;
        Ok(row.map(LabInstance::try_from).transpose()?)
    }

    /// Insert-if-absent on the `(user_id, template_family)` unique index,
    /// then reload. Two concurrent first activations both end up with the
    /// same row, but both go on to start it.
    async fn find_or_create(
        &self,
        user_id: &str,
        template: &LabTemplate,
    ) -> Result<LabInstance, InstanceError> {
        if let Some(existing) = self.find_for(user_id, &template.family).await? {
            return Ok(existing);
        }
        if template.status != TemplateStatus::Published {
            return Err(InstanceError::TemplateNotActivatable {
                template_id: template.id.clone(),
                status: template.status.to_string(),
            });
        }

        let fresh = LabInstance::new(user_id, template);
        let inserted = lab_instances::Entity::insert(fresh.to_active_model()?)
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::TemplateFamily])
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;
        match inserted {
            Ok(_) => info!(
                "Created instance {} for user {} in family {}",
                fresh.id, user_id, template.family
            ),
            Err(DbErr::RecordNotInserted) => {
                debug!("Instance for user {} in family {} created concurrently", user_id, template.family)
            }
            Err(e) => return Err(e.into()),
        }

        self.find_for(user_id, &template.family)
            .await?
            .ok_or_else(|| InstanceError::NotFound(fresh.id))
    }
}

pub(crate) fn require_admin(actor: &Actor) -> Result<(), InstanceError> {
    if actor.is_admin() {
        Ok(())
    } else {
        warn!(target: "audit", "user {} denied an administrative instance operation", actor.user_id);
        Err(InstanceError::AdminRequired)
    }
}

fn check_in_place(current: &LabTemplate, target: &LabTemplate) -> Result<(), InstanceError> {
    if current.family != target.family {
        return Err(InstanceError::IncompatibleUpgrade(format!(
            "template {} belongs to family {}, the instance runs family {}",
            target.id, target.family, current.family
        )));
    }
    if current.execution.internal_port != target.execution.internal_port {
        return Err(InstanceError::IncompatibleUpgrade(format!(
            "internal port changes from {} to {}; use RESET",
            current.execution.internal_port, target.execution.internal_port
        )));
    }
    Ok(())
}

fn to_instances(rows: Vec<lab_instances::Model>) -> Result<Vec<LabInstance>, InstanceError> {
    rows.into_iter()
        .map(|row| LabInstance::try_from(row).map_err(InstanceError::from))
        .collect()
}

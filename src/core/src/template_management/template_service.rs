use chrono::Utc;
use log::{debug, info, warn};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, SqlErr, TransactionTrait,
};
use std::collections::HashSet;
use uuid::Uuid;

use crate::actor::Actor;
use crate::error_handling::types::TemplateError;
use crate::storage::db_entities::lab_templates::{self, Column, Entity};
use crate::template_management::types::{
    validate_version, ChangelogEntry, LabTemplate, NewTemplate, TemplatePatch, TemplateStatus,
};

/// Owns template versioning: drafts, publication, archival and the
/// per-family "latest" pointer.
#[derive(Clone)]
pub struct TemplateService {
    db: DatabaseConnection,
}

impl TemplateService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, template_id: &str) -> Result<LabTemplate, TemplateError> {
        load(&self.db, template_id).await
    }

    /// Every row of a family, oldest first.
    pub async fn list_family(&self, family: &str) -> Result<Vec<LabTemplate>, TemplateError> {
        let rows = Entity::find()
            .filter(Column::Family.eq(family))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;
        rows.into_iter()
            .map(|row| LabTemplate::try_from(row).map_err(TemplateError::from))
            .collect()
    }

    /// Published version a new activation of `family` would use.
    ///
    /// Rows are ranked by `is_latest`, then publication time, then creation
    /// time, so a family that somehow carries two "latest" rows still
    /// resolves deterministically to the most recent one.
    pub async fn find_latest_for_family(
        &self,
        family: &str,
    ) -> Result<Option<LabTemplate>, TemplateError> {
        let row = latest_published(family)
            .one(&self.db)
            .await?;
        row.map(LabTemplate::try_from)
            .transpose()
            .map_err(TemplateError::from)
    }

    /// The latest published row of every family, sorted by title.
    pub async fn catalog(&self) -> Result<Vec<LabTemplate>, TemplateError> {
        let rows = Entity::find()
            .filter(Column::Status.eq(TemplateStatus::Published.as_str()))
            .order_by_asc(Column::Family)
            .order_by_desc(Column::IsLatest)
            .order_by_desc(Column::PublishedAt)
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await?;

        let mut seen = HashSet::new();
        let mut catalog = Vec::new();
        for row in rows {
            if seen.insert(row.family.clone()) {
                catalog.push(LabTemplate::try_from(row)?);
            }
        }
        catalog.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(catalog)
    }

    /// Creates a DRAFT row, in a fresh family unless `input.family` is given.
    pub async fn create_draft(
        &self,
        input: NewTemplate,
        actor: &Actor,
    ) -> Result<LabTemplate, TemplateError> {
        validate_version(&input.version)?;
        input.execution.validate()?;
        if input.slug.trim().is_empty() || input.title.trim().is_empty() {
            return Err(TemplateError::InvalidInput(
                "slug and title are required".to_string(),
            ));
        }

        let now = Utc::now();
        let template = LabTemplate {
            id: Uuid::new_v4().to_string(),
            family: input
                .family
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            slug: input.slug,
            title: input.title,
            difficulty: input.difficulty,
            category: input.category,
            guide: input.guide,
            objectives: input.objectives,
            prerequisites: input.prerequisites,
            tags: input.tags,
            version: input.version,
            status: TemplateStatus::Draft,
            is_latest: false,
            published_at: None,
            changelog: Vec::new(),
            execution: input.execution,
            created_at: now,
            updated_at: now,
        };

        ensure_version_free(&self.db, &template.family, &template.version).await?;
        insert(&self.db, &template).await?;
        info!(
            "Draft template {} ({} v{}) created by {}",
            template.id, template.slug, template.version, actor.user_id
        );
        Ok(template)
    }

    /// Edits a draft. Published and archived rows are read-only.
    pub async fn update_draft(
        &self,
        template_id: &str,
        patch: TemplatePatch,
        actor: &Actor,
    ) -> Result<LabTemplate, TemplateError> {
        let mut template = load(&self.db, template_id).await?;
        if template.status != TemplateStatus::Draft {
            return Err(TemplateError::Immutable(template.id));
        }

        let previous_version = template.version.clone();
        patch.apply(&mut template);
        validate_version(&template.version)?;
        template.execution.validate()?;
        if template.version != previous_version {
            ensure_version_free(&self.db, &template.family, &template.version).await?;
        }
        template.updated_at = Utc::now();

        template.to_active_model()?.update(&self.db).await?;
        debug!("Draft template {} updated by {}", template.id, actor.user_id);
        Ok(template)
    }

    /// Publishes `version` of the template family `template_id` belongs to.
    ///
    /// A draft that already carries `version` is promoted to the first
    /// published row; any other source is copied into a brand-new row and left
    /// untouched. In both cases, within one transaction, every other
    /// PUBLISHED+latest row of the family loses its flag and a changelog entry
    /// is appended.
    pub async fn publish(
        &self,
        template_id: &str,
        version: &str,
        notes: &str,
        actor: &Actor,
    ) -> Result<LabTemplate, TemplateError> {
        validate_version(version)?;

        let txn = self.db.begin().await?;
        let source = load(&txn, template_id).await?;
        source.execution.validate()?;
        let promote_in_place = source.status == TemplateStatus::Draft && source.version == version;
        if !promote_in_place {
            ensure_version_free(&txn, &source.family, version).await?;
        }

        let unflagged = Entity::update_many()
            .col_expr(Column::IsLatest, Expr::value(false))
            .filter(Column::Family.eq(source.family.as_str()))
            .filter(Column::Status.eq(TemplateStatus::Published.as_str()))
            .filter(Column::IsLatest.eq(true))
            .exec(&txn)
            .await?;
        if unflagged.rows_affected > 1 {
            warn!(
                "Family {} had {} rows flagged latest; all cleared",
                source.family, unflagged.rows_affected
            );
        }

        let now = Utc::now();
        let mut changelog = source.changelog.clone();
        changelog.push(ChangelogEntry {
            version: version.to_string(),
            date: now,
            notes: notes.to_string(),
        });

        let published = LabTemplate {
            id: if promote_in_place {
                source.id.clone()
            } else {
                Uuid::new_v4().to_string()
            },
            version: version.to_string(),
            status: TemplateStatus::Published,
            is_latest: true,
            published_at: Some(now),
            changelog,
            created_at: if promote_in_place {
                source.created_at
            } else {
                now
            },
            updated_at: now,
            ..source.clone()
        };

        if promote_in_place {
            published.to_active_model()?.update(&txn).await?;
        } else {
            insert(&txn, &published).await?;
        }
        txn.commit().await?;

        info!(
            "Template family {} published v{} as {} (by {})",
            published.family, published.version, published.id, actor.user_id
        );
        Ok(published)
    }

    /// Hides a template from the catalog. Running instances keep their
    /// pinned version.
    pub async fn archive(
        &self,
        template_id: &str,
        actor: &Actor,
    ) -> Result<LabTemplate, TemplateError> {
        let mut template = load(&self.db, template_id).await?;
        template.status = TemplateStatus::Archived;
        template.updated_at = Utc::now();
        template.to_active_model()?.update(&self.db).await?;
        info!(
            "Template {} (v{}) archived by {}",
            template.id, template.version, actor.user_id
        );
        Ok(template)
    }
}

fn latest_published(family: &str) -> sea_orm::Select<Entity> {
    Entity::find()
        .filter(Column::Family.eq(family))
        .filter(Column::Status.eq(TemplateStatus::Published.as_str()))
        .order_by_desc(Column::IsLatest)
        .order_by_desc(Column::PublishedAt)
        .order_by_desc(Column::CreatedAt)
}

async fn load<C: ConnectionTrait>(db: &C, template_id: &str) -> Result<LabTemplate, TemplateError> {
    let row = Entity::find_by_id(template_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;
    Ok(LabTemplate::try_from(row)?)
}

async fn ensure_version_free<C: ConnectionTrait>(
    db: &C,
    family: &str,
    version: &str,
) -> Result<(), TemplateError> {
    let existing = Entity::find()
        .filter(Column::Family.eq(family))
        .filter(Column::Version.eq(version))
        .one(db)
        .await?;
    match existing {
        Some(_) => Err(TemplateError::VersionExists {
            family: family.to_string(),
            version: version.to_string(),
        }),
        None => Ok(()),
    }
}

/// Inserts a row; a unique-index clash on `(family, version)` from a
/// concurrent writer is reported as `VersionExists`.
async fn insert<C: ConnectionTrait>(db: &C, template: &LabTemplate) -> Result<(), TemplateError> {
    let model: lab_templates::ActiveModel = template.to_active_model()?;
    match lab_templates::Entity::insert(model).exec(db).await {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(TemplateError::VersionExists {
            family: template.family.clone(),
            version: template.version.clone(),
        }),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_template, template_service};

    #[tokio::test]
    async fn test_create_and_update_draft() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let draft = service
            .create_draft(new_template("web-101", "0.1.0", 8080), &admin)
            .await
            .unwrap();
        assert_eq!(draft.status, TemplateStatus::Draft);
        assert!(!draft.is_latest);

        let updated = service
            .update_draft(
                &draft.id,
                TemplatePatch {
                    title: Some("Web basics".into()),
                    ..Default::default()
                },
                &admin,
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "Web basics");
        assert_eq!(service.get(&draft.id).await.unwrap().title, "Web basics");
    }

    #[tokio::test]
    async fn test_publishing_a_draft_promotes_it() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let draft = service
            .create_draft(new_template("web-101", "1.0.0", 8080), &admin)
            .await
            .unwrap();

        let v1 = service
            .publish(&draft.id, "1.0.0", "initial release", &admin)
            .await
            .unwrap();
        assert_eq!(v1.id, draft.id);
        assert_eq!(v1.status, TemplateStatus::Published);
        assert!(v1.is_latest);
        assert!(v1.published_at.is_some());
        assert_eq!(v1.changelog.len(), 1);
        assert_eq!(v1.changelog[0].notes, "initial release");
    }

    #[tokio::test]
    async fn test_publish_new_version_moves_latest_and_keeps_source() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let draft = service
            .create_draft(new_template("web-101", "1.0.0", 8080), &admin)
            .await
            .unwrap();
        let v1 = service.publish(&draft.id, "1.0.0", "v1", &admin).await.unwrap();
        let v1_before = service.get(&v1.id).await.unwrap();

        let v2 = service.publish(&v1.id, "2.0.0", "v2", &admin).await.unwrap();
        assert_ne!(v2.id, v1.id);
        assert_eq!(v2.family, v1.family);
        assert_eq!(v2.status, TemplateStatus::Published);
        assert!(v2.is_latest);
        assert_eq!(v2.changelog.len(), 2);
        assert_eq!(v2.changelog[1].version, "2.0.0");

        let stored_v1 = service.get(&v1.id).await.unwrap();
        assert!(!stored_v1.is_latest);
        assert_eq!(
            LabTemplate {
                is_latest: true,
                ..stored_v1
            },
            v1_before
        );

        let latest = service.find_latest_for_family(&v1.family).await.unwrap().unwrap();
        assert_eq!(latest.id, v2.id);
    }

    #[tokio::test]
    async fn test_duplicate_version_is_rejected_without_side_effects() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let draft = service
            .create_draft(new_template("web-101", "1.0.0", 8080), &admin)
            .await
            .unwrap();
        let v1 = service.publish(&draft.id, "1.0.0", "v1", &admin).await.unwrap();
        let before = service.list_family(&v1.family).await.unwrap();

        let err = service.publish(&v1.id, "1.0.0", "again", &admin).await.unwrap_err();
        assert!(matches!(err, TemplateError::VersionExists { .. }));

        let after = service.list_family(&v1.family).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_published_rows_are_read_only() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let draft = service
            .create_draft(new_template("web-101", "1.0.0", 8080), &admin)
            .await
            .unwrap();
        let v1 = service.publish(&draft.id, "1.0.0", "v1", &admin).await.unwrap();
        let err = service
            .update_draft(&v1.id, TemplatePatch::default(), &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::Immutable(_)));
    }

    #[tokio::test]
    async fn test_archive_hides_from_catalog() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let a = service
            .create_draft(new_template("alpha", "1.0.0", 8080), &admin)
            .await
            .unwrap();
        let b = service
            .create_draft(new_template("bravo", "1.0.0", 22), &admin)
            .await
            .unwrap();
        let a = service.publish(&a.id, "1.0.0", "", &admin).await.unwrap();
        service.publish(&b.id, "1.0.0", "", &admin).await.unwrap();
        service.publish(&a.id, "1.1.0", "", &admin).await.unwrap();

        let catalog = service.catalog().await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].slug, "alpha");
        assert_eq!(catalog[0].version, "1.1.0");

        let latest_alpha = service.find_latest_for_family(&a.family).await.unwrap().unwrap();
        service.archive(&latest_alpha.id, &admin).await.unwrap();
        let catalog = service.catalog().await.unwrap();
        // the older alpha row is still published and becomes the fallback
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].version, "1.0.0");
    }

    #[tokio::test]
    async fn test_latest_ordering_survives_double_flag() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let draft = service
            .create_draft(new_template("web-101", "1.0.0", 8080), &admin)
            .await
            .unwrap();
        let v1 = service.publish(&draft.id, "1.0.0", "", &admin).await.unwrap();
        let v2 = service.publish(&v1.id, "2.0.0", "", &admin).await.unwrap();

        // corrupt the family: flag v1 as latest again
        let mut row = service.get(&v1.id).await.unwrap();
        row.is_latest = true;
        row.to_active_model().unwrap().update(&service.db).await.unwrap();

        let latest = service.find_latest_for_family(&v1.family).await.unwrap().unwrap();
        assert_eq!(latest.id, v2.id);
    }

    #[tokio::test]
    async fn test_invalid_version_is_rejected() {
        let service = template_service().await;
        let admin = Actor::admin("ops");
        let err = service
            .create_draft(new_template("web-101", "one", 8080), &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::InvalidVersion(_)));
    }
}

//! Domain types for lab templates and their conversion to database rows.

use chrono::{DateTime, Utc};
use regex::Regex;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error_handling::types::{StorageError, TemplateError};
use crate::storage::db_entities::lab_templates;
use crate::storage::types::{
    format_timestamp, from_json, parse_optional_timestamp, parse_timestamp, to_json,
};

/// Placeholder substituted with the allocated host port in compose descriptors.
pub const HOST_PORT_PLACEHOLDER: &str = "{{HOST_PORT}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemplateStatus {
    Draft,
    Published,
    Archived,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Draft => "DRAFT",
            TemplateStatus::Published => "PUBLISHED",
            TemplateStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(TemplateStatus::Draft),
            "PUBLISHED" => Ok(TemplateStatus::Published),
            "ARCHIVED" => Ok(TemplateStatus::Archived),
            other => Err(StorageError::Corrupt(format!("template status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub version: String,
    pub date: DateTime<Utc>,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpus: Option<f64>,
    pub memory_mb: Option<u64>,
}

/// How a template is turned into running containers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Container image of the single-service form.
    pub image: String,
    /// Full compose descriptor; takes precedence over `image` when present.
    /// May reference the allocated port through [`HOST_PORT_PLACEHOLDER`].
    pub compose: Option<String>,
    /// Port the lab listens on inside the container.
    pub internal_port: u16,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
}

impl ExecutionConfig {
    /// The compose descriptor, ignoring a blank one.
    pub fn compose_descriptor(&self) -> Option<&str> {
        self.compose.as_deref().filter(|c| !c.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.internal_port == 0 {
            return Err(TemplateError::InvalidInput(
                "execution.internal_port must be non-zero".to_string(),
            ));
        }
        if self.image.trim().is_empty() && self.compose_descriptor().is_none() {
            return Err(TemplateError::InvalidInput(
                "execution needs an image or a compose descriptor".to_string(),
            ));
        }
        Ok(())
    }
}

/// A versioned lab definition. Rows other than drafts are read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabTemplate {
    pub id: String,
    pub family: String,
    pub slug: String,
    pub title: String,
    pub difficulty: String,
    pub category: String,
    pub guide: String,
    pub objectives: Vec<String>,
    pub prerequisites: Vec<String>,
    pub tags: Vec<String>,
    pub version: String,
    pub status: TemplateStatus,
    pub is_latest: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub changelog: Vec<ChangelogEntry>,
    pub execution: ExecutionConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<lab_templates::Model> for LabTemplate {
    type Error = StorageError;

    fn try_from(row: lab_templates::Model) -> Result<Self, Self::Error> {
        Ok(LabTemplate {
            objectives: from_json(&row.objectives, "objectives")?,
            prerequisites: from_json(&row.prerequisites, "prerequisites")?,
            tags: from_json(&row.tags, "tags")?,
            status: row.status.parse()?,
            published_at: parse_optional_timestamp(row.published_at.as_deref())?,
            changelog: from_json(&row.changelog, "changelog")?,
            execution: from_json(&row.execution, "execution")?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            id: row.id,
            family: row.family,
            slug: row.slug,
            title: row.title,
            difficulty: row.difficulty,
            category: row.category,
            guide: row.guide,
            version: row.version,
            is_latest: row.is_latest,
        })
    }
}

impl LabTemplate {
    /// Active model with every column set, suitable for insert and update.
    pub fn to_active_model(&self) -> Result<lab_templates::ActiveModel, StorageError> {
        Ok(lab_templates::ActiveModel {
            id: Set(self.id.clone()),
            family: Set(self.family.clone()),
            slug: Set(self.slug.clone()),
            title: Set(self.title.clone()),
            difficulty: Set(self.difficulty.clone()),
            category: Set(self.category.clone()),
            guide: Set(self.guide.clone()),
            objectives: Set(to_json(&self.objectives)?),
            prerequisites: Set(to_json(&self.prerequisites)?),
            tags: Set(to_json(&self.tags)?),
            version: Set(self.version.clone()),
            status: Set(self.status.as_str().to_string()),
            is_latest: Set(self.is_latest),
            published_at: Set(self.published_at.map(format_timestamp)),
            changelog: Set(to_json(&self.changelog)?),
            execution: Set(to_json(&self.execution)?),
            created_at: Set(format_timestamp(self.created_at)),
            updated_at: Set(format_timestamp(self.updated_at)),
        })
    }
}

/// Input of `TemplateService::create_draft`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewTemplate {
    /// Joins an existing family; a new family is created when absent.
    pub family: Option<String>,
    pub slug: String,
    pub title: String,
    pub difficulty: String,
    pub category: String,
    pub guide: String,
    pub objectives: Vec<String>,
    pub prerequisites: Vec<String>,
    pub tags: Vec<String>,
    pub version: String,
    pub execution: ExecutionConfig,
}

/// Partial update of a draft; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatePatch {
    pub slug: Option<String>,
    pub title: Option<String>,
    pub difficulty: Option<String>,
    pub category: Option<String>,
    pub guide: Option<String>,
    pub objectives: Option<Vec<String>>,
    pub prerequisites: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub version: Option<String>,
    pub execution: Option<ExecutionConfig>,
}

impl TemplatePatch {
    pub fn apply(self, template: &mut LabTemplate) {
        if let Some(v) = self.slug {
            template.slug = v;
        }
        if let Some(v) = self.title {
            template.title = v;
        }
        if let Some(v) = self.difficulty {
            template.difficulty = v;
        }
        if let Some(v) = self.category {
            template.category = v;
        }
        if let Some(v) = self.guide {
            template.guide = v;
        }
        if let Some(v) = self.objectives {
            template.objectives = v;
        }
        if let Some(v) = self.prerequisites {
            template.prerequisites = v;
        }
        if let Some(v) = self.tags {
            template.tags = v;
        }
        if let Some(v) = self.version {
            template.version = v;
        }
        if let Some(v) = self.execution {
            template.execution = v;
        }
    }
}

fn semver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?(\+[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?$",
        )
        .expect("semver pattern compiles")
    })
}

/// Accepts `MAJOR.MINOR.PATCH` with optional pre-release and build suffixes.
pub fn validate_version(version: &str) -> Result<(), TemplateError> {
    if semver_pattern().is_match(version) {
        Ok(())
    } else {
        Err(TemplateError::InvalidVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_versions() {
        for ok in ["1.0.0", "0.2.10", "2.0.0-rc.1", "1.4.2+build.7"] {
            assert!(validate_version(ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in ["1.0", "v1.0.0", "01.0.0", "1.0.0.0", ""] {
            assert!(validate_version(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_execution_config_needs_a_workload() {
        let mut exec = ExecutionConfig {
            internal_port: 8080,
            ..Default::default()
        };
        assert!(exec.validate().is_err());
        exec.compose = Some("services: {}".to_string());
        assert!(exec.validate().is_ok());
        exec.internal_port = 0;
        assert!(exec.validate().is_err());
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let now = Utc::now();
        let mut template = LabTemplate {
            id: "t".into(),
            family: "f".into(),
            slug: "sqli".into(),
            title: "SQL injection".into(),
            difficulty: "easy".into(),
            category: "web".into(),
            guide: String::new(),
            objectives: vec![],
            prerequisites: vec![],
            tags: vec!["web".into()],
            version: "0.1.0".into(),
            status: TemplateStatus::Draft,
            is_latest: false,
            published_at: None,
            changelog: vec![],
            execution: ExecutionConfig::default(),
            created_at: now,
            updated_at: now,
        };
        TemplatePatch {
            title: Some("Blind SQL injection".into()),
            ..Default::default()
        }
        .apply(&mut template);
        assert_eq!(template.title, "Blind SQL injection");
        assert_eq!(template.slug, "sqli");
        assert_eq!(template.tags, vec!["web".to_string()]);
    }
}

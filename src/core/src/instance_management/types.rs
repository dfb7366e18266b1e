use chrono::{DateTime, Utc};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::container_management::types::RuntimeMetadata;
use crate::error_handling::types::StorageError;
use crate::storage::db_entities::lab_instances;
use crate::storage::types::{
    format_timestamp, from_json, parse_optional_timestamp, parse_timestamp, to_json,
};
use crate::template_management::LabTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Inactive,
    Active,
    /// Reachable through direct writes only; no operation enters it today.
    Paused,
    Completed,
    Abandoned,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Inactive => "INACTIVE",
            InstanceState::Active => "ACTIVE",
            InstanceState::Paused => "PAUSED",
            InstanceState::Completed => "COMPLETED",
            InstanceState::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INACTIVE" => Ok(InstanceState::Inactive),
            "ACTIVE" => Ok(InstanceState::Active),
            "PAUSED" => Ok(InstanceState::Paused),
            "COMPLETED" => Ok(InstanceState::Completed),
            "ABANDONED" => Ok(InstanceState::Abandoned),
            other => Err(StorageError::Corrupt(format!("instance state '{}'", other))),
        }
    }
}

/// The single runtime session of one user for one template family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabInstance {
    pub id: String,
    pub user_id: String,
    pub template_id: String,
    pub template_family: String,
    /// Template version the instance was last (re)started against.
    pub template_version_pinned: Option<String>,
    pub state: InstanceState,
    pub progress_percent: u8,
    pub attempts: u32,
    pub notes: String,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Set only while the instance is effectively running.
    pub assigned_port: Option<u16>,
    pub connection_url: Option<String>,
    pub runtime_metadata: RuntimeMetadata,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabInstance {
    /// Fresh INACTIVE instance bound to `template`.
    pub fn new(user_id: &str, template: &LabTemplate) -> Self {
        let now = Utc::now();
        LabInstance {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            template_id: template.id.clone(),
            template_family: template.family.clone(),
            template_version_pinned: None,
            state: InstanceState::Inactive,
            progress_percent: 0,
            attempts: 0,
            notes: String::new(),
            started_at: None,
            last_activity_at: None,
            completed_at: None,
            expires_at: None,
            assigned_port: None,
            connection_url: None,
            runtime_metadata: RuntimeMetadata::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    pub fn to_active_model(&self) -> Result<lab_instances::ActiveModel, StorageError> {
        Ok(lab_instances::ActiveModel {
            id: Set(self.id.clone()),
            user_id: Set(self.user_id.clone()),
            template_id: Set(self.template_id.clone()),
            template_family: Set(self.template_family.clone()),
            template_version_pinned: Set(self.template_version_pinned.clone()),
            state: Set(self.state.as_str().to_string()),
            progress_percent: Set(self.progress_percent as i32),
            attempts: Set(self.attempts as i32),
            notes: Set(self.notes.clone()),
            started_at: Set(self.started_at.map(format_timestamp)),
            last_activity_at: Set(self.last_activity_at.map(format_timestamp)),
            completed_at: Set(self.completed_at.map(format_timestamp)),
            expires_at: Set(self.expires_at.map(format_timestamp)),
            assigned_port: Set(self.assigned_port.map(i32::from)),
            connection_url: Set(self.connection_url.clone()),
            runtime_metadata: Set(to_json(&self.runtime_metadata)?),
            last_error: Set(self.last_error.clone()),
            created_at: Set(format_timestamp(self.created_at)),
            updated_at: Set(format_timestamp(self.updated_at)),
        })
    }
}

impl TryFrom<lab_instances::Model> for LabInstance {
    type Error = StorageError;

    fn try_from(row: lab_instances::Model) -> Result<Self, Self::Error> {
        let progress_percent = u8::try_from(row.progress_percent)
            .map_err(|_| StorageError::Corrupt(format!("progress {}", row.progress_percent)))?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| StorageError::Corrupt(format!("attempts {}", row.attempts)))?;
        let assigned_port = row
            .assigned_port
            .map(|p| u16::try_from(p).map_err(|_| StorageError::Corrupt(format!("port {}", p))))
            .transpose()?;

        Ok(LabInstance {
            state: row.state.parse()?,
            progress_percent,
            attempts,
            started_at: parse_optional_timestamp(row.started_at.as_deref())?,
            last_activity_at: parse_optional_timestamp(row.last_activity_at.as_deref())?,
            completed_at: parse_optional_timestamp(row.completed_at.as_deref())?,
            expires_at: parse_optional_timestamp(row.expires_at.as_deref())?,
            assigned_port,
            runtime_metadata: from_json(&row.runtime_metadata, "runtime_metadata")?,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            id: row.id,
            user_id: row.user_id,
            template_id: row.template_id,
            template_family: row.template_family,
            template_version_pinned: row.template_version_pinned,
            notes: row.notes,
            connection_url: row.connection_url,
            last_error: row.last_error,
        })
    }
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub deactivated: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_text_round_trip() {
        for state in [
            InstanceState::Inactive,
            InstanceState::Active,
            InstanceState::Paused,
            InstanceState::Completed,
            InstanceState::Abandoned,
        ] {
            assert_eq!(state.as_str().parse::<InstanceState>().unwrap(), state);
        }
        assert!("RUNNING".parse::<InstanceState>().is_err());
    }

    #[test]
    fn test_negative_progress_is_corrupt() {
        let row = lab_instances::Model {
            id: "i".into(),
            user_id: "u".into(),
            template_id: "t".into(),
            template_family: "f".into(),
            template_version_pinned: None,
            state: "ACTIVE".into(),
            progress_percent: -1,
            attempts: 0,
            notes: String::new(),
            started_at: None,
            last_activity_at: None,
            completed_at: None,
            expires_at: None,
            assigned_port: None,
            connection_url: None,
            runtime_metadata: "{}".into(),
            last_error: None,
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            updated_at: "2026-01-01T00:00:00.000000Z".into(),
        };
        assert!(matches!(
            LabInstance::try_from(row),
            Err(StorageError::Corrupt(_))
        ));
    }
}

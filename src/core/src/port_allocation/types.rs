use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::port_allocations;
use crate::storage::types::{parse_optional_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AllocationStatus {
    Assigned,
    Released,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Assigned => "ASSIGNED",
            AllocationStatus::Released => "RELEASED",
        }
    }
}

impl FromStr for AllocationStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ASSIGNED" => Ok(AllocationStatus::Assigned),
            "RELEASED" => Ok(AllocationStatus::Released),
            other => Err(StorageError::Corrupt(format!("allocation status '{}'", other))),
        }
    }
}

/// One attempt at binding a host port to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub id: i32,
    pub port: u16,
    /// Equal to `port` while this is the current assignment, otherwise `None`.
    pub active_port: Option<u16>,
    pub instance_id: Option<String>,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

fn to_port(value: i32) -> Result<u16, StorageError> {
    u16::try_from(value).map_err(|_| StorageError::Corrupt(format!("port {}", value)))
}

impl TryFrom<port_allocations::Model> for PortAllocation {
    type Error = StorageError;

    fn try_from(row: port_allocations::Model) -> Result<Self, Self::Error> {
        Ok(PortAllocation {
            id: row.id,
            port: to_port(row.port)?,
            active_port: row.active_port.map(to_port).transpose()?,
            status: row.status.parse()?,
            allocated_at: parse_timestamp(&row.allocated_at)?,
            released_at: parse_optional_timestamp(row.released_at.as_deref())?,
            instance_id: row.instance_id,
        })
    }
}

use chrono::Utc;
use log::{debug, info, warn};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    NotSet, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use tokio::sync::Mutex;

use crate::configuration::{PortRange, PortsConfig};
use crate::error_handling::types::PortError;
use crate::port_allocation::types::{AllocationStatus, PortAllocation};
use crate::storage::db_entities::port_allocations::{self, Column, Entity};
use crate::storage::types::format_timestamp;
use crate::template_management::template_service::is_unique_violation;

/// Hands out host ports from a fixed range without collisions.
///
/// Exclusivity rests on three layers:
/// - an async mutex serialising allocations issued by this process,
/// - a database transaction around the scan and the insert,
/// - the unique index on `active_port`, which turns a lost race against
///   another process into a skipped candidate.
pub struct PortAllocator {
    db: DatabaseConnection,
    range: PortRange,
    probe_host: bool,
    lock: Mutex<()>,
}

impl PortAllocator {
    pub fn new(db: DatabaseConnection, config: &PortsConfig) -> Result<Self, PortError> {
        let range = config.range();
        if !range.is_well_formed() {
            return Err(PortError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        Ok(Self {
            db,
            range,
            probe_host: config.probe_host,
            lock: Mutex::new(()),
        })
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Assigns the lowest free port of the range to `instance_id`.
    ///
    /// Any assignment the instance still holds is released first, so an
    /// instance never owns more than one current allocation.
    pub async fn allocate(&self, instance_id: &str) -> Result<u16, PortError> {
        let _guard = self.lock.lock().await;
        let txn = self.db.begin().await?;

        if let Some(previous) = Self::release_in(&txn, instance_id).await? {
            debug!(
                "Instance {} still held port {}; released before reallocation",
                instance_id, previous
            );
        }

        let claimed: HashSet<i32> = Entity::find()
            .filter(Column::Status.eq(AllocationStatus::Assigned.as_str()))
            .filter(Column::ActivePort.between(self.range.start as i32, self.range.end as i32))
            .all(&txn)
            .await?
            .into_iter()
            .filter_map(|row| row.active_port)
            .collect();

        for port in self.range.start..=self.range.end {
            if claimed.contains(&(port as i32)) {
                continue;
            }
            if self.probe_host && !is_port_free(port) {
                debug!("Port {} is occupied on the host, skipping", port);
                continue;
            }

            let row = port_allocations::ActiveModel {
                id: NotSet,
                port: Set(port as i32),
                active_port: Set(Some(port as i32)),
                instance_id: Set(Some(instance_id.to_string())),
                status: Set(AllocationStatus::Assigned.as_str().to_string()),
                allocated_at: Set(format_timestamp(Utc::now())),
                released_at: Set(None),
            };
            match row.insert(&txn).await {
                Ok(_) => {
                    txn.commit().await?;
                    info!("Allocated port {} to instance {}", port, instance_id);
                    return Ok(port);
                }
                Err(err) if is_unique_violation(&err) => {
                    debug!("Port {} was claimed concurrently, skipping", port);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            "Port range {}-{} exhausted while allocating for instance {}",
            self.range.start, self.range.end, instance_id
        );
        Err(PortError::Exhausted {
            start: self.range.start,
            end: self.range.end,
        })
    }

    /// Releases the current assignment of `instance_id`, if any.
    pub async fn release(&self, instance_id: &str) -> Result<Option<u16>, PortError> {
        let released = Self::release_in(&self.db, instance_id).await?;
        if let Some(port) = released {
            info!("Released port {} from instance {}", port, instance_id);
        }
        Ok(released)
    }

    /// Same as [`release`](Self::release) on a caller-owned connection or
    /// transaction. History rows are kept; only `active_port` is cleared.
    pub async fn release_in<C: ConnectionTrait>(
        conn: &C,
        instance_id: &str,
    ) -> Result<Option<u16>, PortError> {
        let rows = Entity::find()
            .filter(Column::InstanceId.eq(instance_id))
            .filter(Column::Status.eq(AllocationStatus::Assigned.as_str()))
            .all(conn)
            .await?;

        let now = format_timestamp(Utc::now());
        let mut released = None;
        for row in rows {
            let port = row.port;
            let mut active: port_allocations::ActiveModel = row.into();
            active.status = Set(AllocationStatus::Released.as_str().to_string());
            active.active_port = Set(None);
            active.released_at = Set(Some(now.clone()));
            active.update(conn).await?;
            released = u16::try_from(port).ok();
        }
        Ok(released)
    }

    /// Every ledger row for `port`, oldest first.
    pub async fn history_for_port(&self, port: u16) -> Result<Vec<PortAllocation>, PortError> {
        let rows = Entity::find()
            .filter(Column::Port.eq(port as i32))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        rows.into_iter()
            .map(|row| PortAllocation::try_from(row).map_err(PortError::from))
            .collect()
    }

    pub async fn current_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<PortAllocation>, PortError> {
        let row = Entity::find()
            .filter(Column::InstanceId.eq(instance_id))
            .filter(Column::Status.eq(AllocationStatus::Assigned.as_str()))
            .one(&self.db)
            .await?;
        Ok(row.map(PortAllocation::try_from).transpose()?)
    }
}

/// Best-effort local probe: a port that cannot be bound on all interfaces is
/// considered taken by something outside the ledger.
fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

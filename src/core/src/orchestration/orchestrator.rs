use chrono::Utc;
use log::{debug, info};
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, TransactionTrait};
use std::sync::Arc;

use crate::container_management::types::{DriverOperation, UpgradeStrategy};
use crate::container_management::ExecutionDriver;
use crate::error_handling::types::InstanceError;
use crate::instance_management::types::{InstanceState, LabInstance};
use crate::port_allocation::PortAllocator;
use crate::public_access::{PublicAccessResolver, PublicEndpoint};
use crate::template_management::LabTemplate;

/// Glue between an instance row, the execution driver and the public access
/// resolver. Persists what the driver reports; decides nothing about the
/// lifecycle itself.
pub struct Orchestrator {
    db: DatabaseConnection,
    driver: Arc<ExecutionDriver>,
    resolver: PublicAccessResolver,
}

impl Orchestrator {
    pub fn new(
        db: DatabaseConnection,
        driver: Arc<ExecutionDriver>,
        resolver: PublicAccessResolver,
    ) -> Self {
        Self {
            db,
            driver,
            resolver,
        }
    }

    pub fn driver(&self) -> &ExecutionDriver {
        &self.driver
    }

    pub fn resolver(&self) -> &PublicAccessResolver {
        &self.resolver
    }

    /// Starts `instance` on `port` and records the port and its public URL.
    ///
    /// The endpoint is resolved before the driver runs so a configuration
    /// error never leaves an unrecorded container behind.
    pub async fn start_instance(
        &self,
        instance: &mut LabInstance,
        template: &LabTemplate,
        port: u16,
        request_host: Option<&str>,
    ) -> Result<PublicEndpoint, InstanceError> {
        let endpoint = self.resolver.resolve(&instance.id, port, request_host)?;
        let output = self.driver.start(instance, template, port).await?;

        instance.runtime_metadata.record(DriverOperation::Start, output);
        instance.assigned_port = Some(port);
        instance.connection_url = Some(endpoint.access_url.clone());
        persist(&self.db, instance).await?;
        debug!("Instance {} started at {}", instance.id, endpoint.access_url);
        Ok(endpoint)
    }

    /// Stops the runtime side, then releases the port and marks the row
    /// INACTIVE in one transaction.
    pub async fn stop_instance(&self, instance: &mut LabInstance) -> Result<(), InstanceError> {
        let output = self.driver.stop(instance).await?;

        let mut stopped = instance.clone();
        stopped.runtime_metadata.record(DriverOperation::Stop, output);
        stopped.assigned_port = None;
        stopped.connection_url = None;
        stopped.state = InstanceState::Inactive;

        let txn = self.db.begin().await?;
        let released = PortAllocator::release_in(&txn, &instance.id).await?;
        persist(&txn, &mut stopped).await?;
        txn.commit().await?;

        *instance = stopped;
        debug!("Instance {} stopped (released port: {:?})", instance.id, released);
        Ok(())
    }

    pub async fn restart_instance(&self, instance: &mut LabInstance) -> Result<(), InstanceError> {
        let output = self.driver.restart(instance).await?;
        instance.runtime_metadata.record(DriverOperation::Restart, output);
        persist(&self.db, instance).await
    }

    pub async fn upgrade_instance(
        &self,
        instance: &mut LabInstance,
        target: &LabTemplate,
        strategy: UpgradeStrategy,
        port: u16,
        request_host: Option<&str>,
    ) -> Result<PublicEndpoint, InstanceError> {
        let endpoint = self.resolver.resolve(&instance.id, port, request_host)?;
        let output = self
            .driver
            .upgrade(instance, target, strategy, port)
            .await?;

        instance.runtime_metadata.record(DriverOperation::Upgrade, output);
        instance.assigned_port = Some(port);
        instance.connection_url = Some(endpoint.access_url.clone());
        persist(&self.db, instance).await?;
        Ok(endpoint)
    }

    /// Removes the runtime side of `instance` and clears everything that
    /// pointed at it, all in one transaction.
    ///
    /// If any step fails nothing is committed and `instance` is left as it
    /// was.
    pub async fn destroy_instance(&self, instance: &mut LabInstance) -> Result<(), InstanceError> {
        let txn = self.db.begin().await?;

        let output = self.driver.destroy(instance).await?;
        debug!("Destroy output for {}: {}", instance.id, output);
        let released = PortAllocator::release_in(&txn, &instance.id).await?;

        let mut cleared = instance.clone();
        cleared.runtime_metadata.clear();
        cleared.assigned_port = None;
        cleared.connection_url = None;
        cleared.state = InstanceState::Inactive;
        persist(&txn, &mut cleared).await?;

        txn.commit().await?;
        *instance = cleared;
        info!(
            "Instance {} destroyed (released port: {:?})",
            instance.id, released
        );
        Ok(())
    }
}

/// Writes every column of `instance`, stamping `updated_at`.
pub(crate) async fn persist<C: ConnectionTrait>(
    conn: &C,
    instance: &mut LabInstance,
) -> Result<(), InstanceError> {
    instance.updated_at = Utc::now();
    instance.to_active_model()?.update(conn).await?;
    Ok(())
}

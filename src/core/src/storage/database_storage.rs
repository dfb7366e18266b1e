use std::time::Duration;

use log::{debug, info};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};

use crate::configuration::DatabaseConfig;
use crate::error_handling::types::StorageError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS lab_templates (
        id TEXT PRIMARY KEY NOT NULL,
        family TEXT NOT NULL,
        slug TEXT NOT NULL,
        title TEXT NOT NULL,
        difficulty TEXT NOT NULL,
        category TEXT NOT NULL,
        guide TEXT NOT NULL,
        objectives TEXT NOT NULL,
        prerequisites TEXT NOT NULL,
        tags TEXT NOT NULL,
        version TEXT NOT NULL,
        status TEXT NOT NULL,
        is_latest INTEGER NOT NULL DEFAULT 0,
        published_at TEXT,
        changelog TEXT NOT NULL,
        execution TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_lab_templates_family_version
        ON lab_templates (family, version);",
    "CREATE TABLE IF NOT EXISTS lab_instances (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        template_id TEXT NOT NULL,
        template_family TEXT NOT NULL,
        template_version_pinned TEXT,
        state TEXT NOT NULL,
        progress_percent INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        notes TEXT NOT NULL DEFAULT '',
        started_at TEXT,
        last_activity_at TEXT,
        completed_at TEXT,
        expires_at TEXT,
        assigned_port INTEGER,
        connection_url TEXT,
        runtime_metadata TEXT NOT NULL DEFAULT '{}',
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_lab_instances_user_family
        ON lab_instances (user_id, template_family);",
    "CREATE TABLE IF NOT EXISTS port_allocations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        port INTEGER NOT NULL,
        active_port INTEGER,
        instance_id TEXT,
        status TEXT NOT NULL,
        allocated_at TEXT NOT NULL,
        released_at TEXT
    );",
    // NULLs are distinct in SQLite unique indexes, so released rows never clash.
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_port_allocations_active_port
        ON port_allocations (active_port);",
    "CREATE INDEX IF NOT EXISTS ix_port_allocations_instance
        ON port_allocations (instance_id, status);",
];

/// Owns the SeaORM connection pool and the schema bootstrap.
///
/// Services receive clones of the underlying [`DatabaseConnection`]; the pool
/// is shared, so cloning is cheap.
pub struct DatabaseStorage {
    conn: DatabaseConnection,
}

impl DatabaseStorage {
    /// Opens the database described by `config` and creates missing tables.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        info!("Opening database {}", config.url);
        let mut opts = ConnectOptions::new(config.url.clone());
        opts.max_connections(config.max_connections)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        Self::open(opts).await
    }

    /// Private in-memory database, used by tests and demos.
    ///
    /// Each SQLite connection would get its own empty memory database, so the
    /// pool is pinned to a single connection.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
        opts.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        Self::open(opts).await
    }

    async fn open(opts: ConnectOptions) -> Result<Self, StorageError> {
        let conn = Database::connect(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        let storage = Self { conn };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            self.conn
                .execute_unprepared(statement)
                .await
                .map_err(|e| StorageError::WriteFailed(format!("schema bootstrap: {}", e)))?;
        }
        debug!("Database schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}

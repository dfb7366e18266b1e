//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `lab_templates`: one row per (family, version) of a lab definition
//! - `lab_instances`: one runtime session per (user, template family)
//! - `port_allocations`: append-only ledger of host port assignments
//!
//! Timestamps are RFC3339 strings and structured payloads are JSON text, as
//! decoded by [`crate::storage::types`].

/// Lab templates table entity models.
pub mod lab_templates {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "lab_templates")]
    pub struct Model {
        /// UUID as string primary key
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        /// Groups every version of the same lab
        pub family: String,
        pub slug: String,
        pub title: String,
        pub difficulty: String,
        pub category: String,
        pub guide: String,
        /// JSON array of strings
        pub objectives: String,
        /// JSON array of strings
        pub prerequisites: String,
        /// JSON array of strings
        pub tags: String,
        pub version: String,
        /// `DRAFT`, `PUBLISHED` or `ARCHIVED`
        pub status: String,
        pub is_latest: bool,
        pub published_at: Option<String>,
        /// JSON array of changelog entries
        pub changelog: String,
        /// JSON execution configuration
        pub execution: String,
        pub created_at: String,
        pub updated_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Lab instances table entity models.
pub mod lab_instances {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "lab_instances")]
    pub struct Model {
        /// UUID as string primary key
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub user_id: String,
        /// Template currently bound to the instance
        pub template_id: String,
        /// Family of the bound template, part of the (user, family) unique key
        pub template_family: String,
        pub template_version_pinned: Option<String>,
        /// Lifecycle state as string enum
        pub state: String,
        pub progress_percent: i32,
        pub attempts: i32,
        pub notes: String,
        pub started_at: Option<String>,
        pub last_activity_at: Option<String>,
        pub completed_at: Option<String>,
        pub expires_at: Option<String>,
        pub assigned_port: Option<i32>,
        pub connection_url: Option<String>,
        /// JSON object keyed by driver operation name
        pub runtime_metadata: String,
        pub last_error: Option<String>,
        pub created_at: String,
        pub updated_at: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Port allocation ledger entity models.
pub mod port_allocations {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "port_allocations")]
    pub struct Model {
        /// Auto-increment row id
        #[sea_orm(primary_key)]
        pub id: i32,
        /// Bare port number, recurs across history
        pub port: i32,
        /// Set only while the row is the current assignment; unique
        pub active_port: Option<i32>,
        pub instance_id: Option<String>,
        /// `ASSIGNED` or `RELEASED`
        pub status: String,
        pub allocated_at: String,
        pub released_at: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

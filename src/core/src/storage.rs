//! Storage subsystem
//!
//! Persistence for the three ledgers of the engine, backed by SQLite through SeaORM.
//!
//! Components:
//! - `database_storage`: connection handling and schema bootstrap.
//! - `db_entities`: SeaORM entity models for templates, instances and port allocations.
//! - `types`: encoding helpers shared by the services (timestamps, JSON columns).

pub mod database_storage;
pub mod db_entities;
pub mod types;

pub use database_storage::DatabaseStorage;

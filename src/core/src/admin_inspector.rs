//! Read-only introspection of instances for operator dashboards.

pub mod inspector;

pub use inspector::{redact_environment, AdminInspector, InstanceInspection};

pub mod actor;
pub mod admin_inspector;
pub mod configuration;
pub mod container_management;
pub mod controller;
pub mod error_handling;
pub mod instance_management;
pub mod orchestration;
pub mod port_allocation;
pub mod preflight;
pub mod public_access;
pub mod storage;
pub mod template_management;
pub mod web_interface;

#[cfg(test)]
pub(crate) mod test_support;

pub use actor::{Actor, Role};
pub use controller::Controller;

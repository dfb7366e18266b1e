//! Lab instance lifecycle.
//!
//! One instance exists per (user, template family). Activation creates it on
//! first use; upgrades re-point the same row at another template version.
//!
//! ```text
//! INACTIVE --activate--> ACTIVE --deactivate/sweep--> INACTIVE
//!                          |  \--progress 100--> COMPLETED
//!                          \--upgrade--> ACTIVE
//! ```

pub mod instance_service;
pub mod types;

pub use instance_service::InstanceService;
pub use types::{InstanceState, LabInstance, SweepReport};
pub use crate::container_management::types::UpgradeStrategy;

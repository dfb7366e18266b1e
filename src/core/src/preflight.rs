//! Environment validation run before activations and on demand by operators.

pub mod preflight_service;
pub mod types;

pub use preflight_service::PreflightService;
pub use types::{CheckResult, PreflightReport};

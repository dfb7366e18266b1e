//! Mediation between instance rows and the execution backend.

pub mod orchestrator;

pub use orchestrator::Orchestrator;

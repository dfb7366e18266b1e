//! Error taxonomy shared by every component of the orchestration engine.
//!
//! Each component owns one error enum; [`ErrorKind`] groups them into the
//! categories callers act upon (configuration, conflict, runtime, domain,
//! not-found, forbidden, storage).

pub mod types;

pub use types::*;
